use super::*;

#[test]
fn test_application_state_conversion() {
    assert_eq!(ApplicationState::from(0), ApplicationState::Created);
    assert_eq!(ApplicationState::from(2), ApplicationState::Running);
    assert_eq!(ApplicationState::from(99), ApplicationState::Created);
    assert_eq!(ApplicationState::ShuttingDown.to_string(), "shutting down");
}

#[test]
fn test_shutdown_signal() {
    let signal = ShutdownSignal::new();
    let mut rx = signal.subscribe();

    signal.trigger();

    let result = rx.try_recv();
    assert!(result.is_ok());
}

#[test]
fn test_lifecycle_start_stop() {
    let lifecycle = Lifecycle::new();
    assert_eq!(lifecycle.state(), ApplicationState::Created);
    assert!(!lifecycle.startup_complete());

    lifecycle.begin_start().unwrap();
    assert_eq!(lifecycle.state(), ApplicationState::Starting);
    lifecycle.mark_running();
    assert!(lifecycle.is_running());
    assert!(lifecycle.startup_complete());

    let mut rx = lifecycle.shutdown_signal().subscribe();
    assert!(lifecycle.begin_stop());
    assert!(rx.try_recv().is_ok());
    lifecycle.mark_stopped();
    assert_eq!(lifecycle.state(), ApplicationState::Stopped);
    assert!(lifecycle.shutdown_complete());
}

#[test]
fn test_cannot_start_twice() {
    let lifecycle = Lifecycle::new();
    lifecycle.begin_start().unwrap();

    let err = lifecycle.begin_start().unwrap_err();
    assert!(matches!(
        err,
        KernelError::InvalidState {
            action: "start",
            state: ApplicationState::Starting
        }
    ));
}

#[test]
fn test_restart_resets_flags() {
    let lifecycle = Lifecycle::new();
    lifecycle.begin_start().unwrap();
    lifecycle.mark_running();
    assert!(lifecycle.begin_stop());
    lifecycle.mark_stopped();

    lifecycle.begin_start().unwrap();
    assert!(!lifecycle.startup_complete());
    assert!(!lifecycle.shutdown_complete());
}

#[test]
fn test_stop_when_not_started() {
    let lifecycle = Lifecycle::new();
    assert!(!lifecycle.begin_stop());
    assert_eq!(lifecycle.state(), ApplicationState::Created);
}
