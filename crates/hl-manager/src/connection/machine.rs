//! Transition table for a single host's connection
//!
//! `transition` is pure: it names the next state and the side effect the
//! driver must perform, and never touches I/O. Pairs that have no row in the
//! table return `None` and are ignored by the driver.

use hl_core::{ConnectionState, FailureCause};

/// Something that happened to a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Explicit connect request or automatic reconnect
    Connect,
    /// No usable cached key
    KeyMissing,
    /// A cached key was found
    KeyFound,
    /// A fresh key pair was written
    KeyGenerated,
    /// The host accepted the public key
    UploadAcknowledged,
    /// A provisioning step gave up
    Failed(FailureCause),
    /// Liveness lost or the sync channel could not be established
    LinkLost,
    /// Automatic reconnects ran out while offline
    ReconnectsExhausted,
    /// Tear everything down and provision again
    ForceRestart,
    /// Tear everything down and stay offline
    Disconnect,
}

/// Work the driver performs when a transition is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Look up the cached key
    BeginProvisioning,
    /// Generate a key pair
    GenerateKey,
    /// Push the public key to the host
    UploadKey,
    /// Open the sync channel and start probing
    StartChannel,
    /// Close the channel and schedule an automatic reconnect
    TearDownAndRetry,
    /// Cancel the in-flight step, close the channel, provision again
    TearDownAndRestart,
    /// Cancel the in-flight step and close the channel
    TearDown,
    /// Report the failure
    SurfaceError,
}

impl Effect {
    /// Whether the effect releases the step and channel before the state changes
    pub fn tears_down(&self) -> bool {
        matches!(
            self,
            Effect::TearDown | Effect::TearDownAndRestart | Effect::TearDownAndRetry
        )
    }
}

/// Result of applying an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub to: ConnectionState,
    pub effect: Effect,
}

impl Transition {
    fn new(to: ConnectionState, effect: Effect) -> Option<Self> {
        Some(Self { to, effect })
    }
}

/// Look up the row for `(state, event)`
pub fn transition(state: ConnectionState, event: Event) -> Option<Transition> {
    use ConnectionState::*;

    match (state, event) {
        (_, Event::ForceRestart) => Transition::new(Starting, Effect::TearDownAndRestart),
        (_, Event::Disconnect) => Transition::new(Offline, Effect::TearDown),

        (Offline | Error(_), Event::Connect) => {
            Transition::new(Starting, Effect::BeginProvisioning)
        }
        (Offline, Event::ReconnectsExhausted) => Transition::new(
            Error(FailureCause::NetworkUnreachable),
            Effect::SurfaceError,
        ),

        (Starting, Event::KeyMissing) => Transition::new(CreatingSshKey, Effect::GenerateKey),
        (Starting, Event::KeyFound) => Transition::new(UploadingSshKey, Effect::UploadKey),
        (CreatingSshKey, Event::KeyGenerated) => {
            Transition::new(UploadingSshKey, Effect::UploadKey)
        }
        (UploadingSshKey, Event::UploadAcknowledged) => {
            Transition::new(Online, Effect::StartChannel)
        }
        (Starting | CreatingSshKey | UploadingSshKey, Event::Failed(cause)) => {
            Transition::new(Error(cause), Effect::SurfaceError)
        }

        (Online, Event::LinkLost) => Transition::new(Offline, Effect::TearDownAndRetry),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ConnectionState::*;

    const ALL_STATES: [ConnectionState; 8] = [
        Offline,
        Starting,
        CreatingSshKey,
        UploadingSshKey,
        Online,
        Error(FailureCause::KeyGenerationFailed),
        Error(FailureCause::UploadRejected),
        Error(FailureCause::NetworkUnreachable),
    ];

    fn to(state: ConnectionState, event: Event) -> Option<ConnectionState> {
        transition(state, event).map(|t| t.to)
    }

    #[test]
    fn test_forward_path_without_cached_key() {
        let mut state = Offline;
        let mut visited = vec![state];
        for event in [
            Event::Connect,
            Event::KeyMissing,
            Event::KeyGenerated,
            Event::UploadAcknowledged,
        ] {
            state = to(state, event).unwrap();
            visited.push(state);
        }
        assert_eq!(
            visited,
            vec![Offline, Starting, CreatingSshKey, UploadingSshKey, Online]
        );
    }

    #[test]
    fn test_cached_key_skips_generation_only() {
        let t = transition(Starting, Event::KeyFound).unwrap();
        assert_eq!(t.to, UploadingSshKey);
        assert_eq!(t.effect, Effect::UploadKey);
    }

    #[test]
    fn test_upload_acknowledged_starts_channel() {
        let t = transition(UploadingSshKey, Event::UploadAcknowledged).unwrap();
        assert_eq!(t.to, Online);
        assert_eq!(t.effect, Effect::StartChannel);
    }

    #[test]
    fn test_connect_is_noop_while_busy_or_online() {
        for state in [Starting, CreatingSshKey, UploadingSshKey, Online] {
            assert_eq!(transition(state, Event::Connect), None, "{state:?}");
        }
    }

    #[test]
    fn test_connect_from_error_retries() {
        let t = transition(Error(FailureCause::UploadRejected), Event::Connect).unwrap();
        assert_eq!(t.to, Starting);
        assert_eq!(t.effect, Effect::BeginProvisioning);
    }

    #[test]
    fn test_failures_only_from_provisioning_states() {
        for state in ALL_STATES {
            let result = to(state, Event::Failed(FailureCause::UploadRejected));
            if state.is_provisioning() {
                assert_eq!(result, Some(Error(FailureCause::UploadRejected)));
            } else {
                assert_eq!(result, None, "{state:?}");
            }
        }
    }

    #[test]
    fn test_link_lost_schedules_retry() {
        let t = transition(Online, Event::LinkLost).unwrap();
        assert_eq!(t.to, Offline);
        assert_eq!(t.effect, Effect::TearDownAndRetry);
        assert_eq!(transition(Starting, Event::LinkLost), None);
    }

    #[test]
    fn test_reconnects_exhausted() {
        assert_eq!(
            to(Offline, Event::ReconnectsExhausted),
            Some(Error(FailureCause::NetworkUnreachable))
        );
        assert_eq!(to(Online, Event::ReconnectsExhausted), None);
    }

    #[test]
    fn test_force_restart_from_anywhere() {
        for state in ALL_STATES {
            let t = transition(state, Event::ForceRestart).unwrap();
            assert_eq!(t.to, Starting);
            assert_eq!(t.effect, Effect::TearDownAndRestart);
        }
    }

    #[test]
    fn test_disconnect_from_anywhere() {
        for state in ALL_STATES {
            let t = transition(state, Event::Disconnect).unwrap();
            assert_eq!(t.to, Offline);
            assert!(t.effect.tears_down());
        }
    }

    #[test]
    fn test_out_of_order_step_results_are_ignored() {
        assert_eq!(transition(Online, Event::KeyFound), None);
        assert_eq!(transition(Offline, Event::KeyGenerated), None);
        assert_eq!(transition(CreatingSshKey, Event::UploadAcknowledged), None);
        assert_eq!(transition(UploadingSshKey, Event::KeyMissing), None);
    }

    #[test]
    fn test_every_reachable_state_moves_forward_or_to_sink() {
        for state in ALL_STATES {
            for event in [
                Event::Connect,
                Event::KeyMissing,
                Event::KeyFound,
                Event::KeyGenerated,
                Event::UploadAcknowledged,
                Event::Failed(FailureCause::NetworkUnreachable),
            ] {
                if let Some(next) = to(state, event) {
                    let forward = next.stage() > state.stage();
                    let sink = matches!(next, Error(_));
                    let retry = matches!(state, Error(_)) && next == Starting;
                    assert!(forward || sink || retry, "{state:?} + {event:?} -> {next:?}");
                }
            }
        }
    }
}
