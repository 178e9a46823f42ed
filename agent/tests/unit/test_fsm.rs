//! FSM unit tests

use autoshipd::deploy::fsm::{WorkflowEvent, WorkflowFsm, WorkflowState, WorkflowStep};

#[test]
fn test_fsm_initial_state() {
    let fsm = WorkflowFsm::new();
    assert_eq!(fsm.state(), &WorkflowState::Validated);
    assert_eq!(fsm.next_step(), Some(WorkflowStep::ProxyConfig));
    assert!(fsm.error().is_none());
    assert!(!fsm.is_terminal());
}

#[test]
fn test_fsm_success_flow() {
    let mut fsm = WorkflowFsm::new();

    fsm.process(WorkflowEvent::ProxyConfigured).unwrap();
    assert_eq!(fsm.state(), &WorkflowState::ProxyConfigured);

    fsm.process(WorkflowEvent::DnsRecordCreated).unwrap();
    assert_eq!(fsm.state(), &WorkflowState::DnsRecordCreated);

    fsm.process(WorkflowEvent::DnsPropagated).unwrap();
    assert_eq!(fsm.state(), &WorkflowState::DnsPropagated);

    fsm.process(WorkflowEvent::CertificateIssued).unwrap();
    assert_eq!(fsm.state(), &WorkflowState::CertificateIssued);

    fsm.process(WorkflowEvent::ProxyReloaded).unwrap();
    assert_eq!(fsm.state(), &WorkflowState::ProxyReloaded);
    assert_eq!(fsm.next_step(), Some(WorkflowStep::Report));

    fsm.process(WorkflowEvent::Reported).unwrap();
    assert_eq!(fsm.state(), &WorkflowState::Reported);
    assert!(fsm.is_terminal());
    assert!(!fsm.is_failed());
}

#[test]
fn test_fsm_steps_cannot_be_skipped() {
    let mut fsm = WorkflowFsm::new();

    assert!(fsm.process(WorkflowEvent::DnsRecordCreated).is_err());
    assert!(fsm.process(WorkflowEvent::Reported).is_err());
    assert_eq!(fsm.state(), &WorkflowState::Validated);

    fsm.process(WorkflowEvent::ProxyConfigured).unwrap();
    assert!(fsm.process(WorkflowEvent::CertificateIssued).is_err());
    assert_eq!(fsm.state(), &WorkflowState::ProxyConfigured);
}

#[test]
fn test_fsm_certificate_failure() {
    let mut fsm = WorkflowFsm::new();
    fsm.process(WorkflowEvent::ProxyConfigured).unwrap();
    fsm.process(WorkflowEvent::DnsRecordCreated).unwrap();
    fsm.process(WorkflowEvent::DnsPropagated).unwrap();

    fsm.process(WorkflowEvent::StepFailed("rate limited".to_string()))
        .unwrap();

    assert!(fsm.is_failed());
    assert!(fsm.is_terminal());
    assert_eq!(fsm.state().label(), "certificate");
    assert_eq!(fsm.error(), Some("rate limited"));
}

#[test]
fn test_fsm_reported_is_terminal() {
    let mut fsm = WorkflowFsm::new();
    for event in [
        WorkflowEvent::ProxyConfigured,
        WorkflowEvent::DnsRecordCreated,
        WorkflowEvent::DnsPropagated,
        WorkflowEvent::CertificateIssued,
        WorkflowEvent::ProxyReloaded,
        WorkflowEvent::Reported,
    ] {
        fsm.process(event).unwrap();
    }

    assert!(fsm
        .process(WorkflowEvent::StepFailed("late".to_string()))
        .is_err());
    assert_eq!(fsm.state(), &WorkflowState::Reported);
}
