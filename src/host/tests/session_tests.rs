//! Tests for attached sessions.

use super::*;
use crate::provider::{InstrumentationProvider, LookupKey};
use crate::testing::FakeProvider;

fn attach(provider: &FakeProvider, pid: u32) -> Session {
    let key = LookupKey::new(ProcessId(pid), None).unwrap();
    let buffer = provider.resolve(&key).unwrap();
    Session::new(ProcessId(pid), None, buffer)
}

#[test]
fn test_bytes_are_captured_at_call_time() {
    let provider = FakeProvider::with_processes(&[42]);
    provider.set_buffer(42, b"v1");
    let session = attach(&provider, 42);

    assert_eq!(session.bytes().unwrap(), b"v1");

    provider.set_buffer(42, b"v2");
    assert_eq!(session.bytes().unwrap(), b"v2");
}

#[test]
fn test_capacity_is_independent_of_content() {
    let provider = FakeProvider::with_processes(&[42]);
    provider.set_buffer(42, &[0u8; 128]);
    let session = attach(&provider, 42);

    provider.set_buffer(42, b"short");
    assert_eq!(session.capacity().unwrap(), 128);
}

#[test]
fn test_detach_invalidates_session() {
    let provider = FakeProvider::with_processes(&[42]);
    let session = attach(&provider, 42);

    session.detach().unwrap();

    let invalid = HostError::SessionInvalid {
        session_id: session.id(),
    };
    assert_eq!(session.bytes(), Err(invalid.clone()));
    assert_eq!(session.capacity(), Err(invalid.clone()));
    assert_eq!(session.detach(), Err(invalid));
    assert_eq!(provider.detached_count(), 1);
}

#[test]
fn test_owner_survives_detach() {
    let provider = FakeProvider::with_processes(&[42]);
    let session = attach(&provider, 42);

    session.detach().unwrap();
    assert_eq!(session.owner_process_id(), ProcessId(42));
}

#[test]
fn test_exited_process_releases_buffer() {
    let provider = FakeProvider::with_processes(&[42]);
    let session = attach(&provider, 42);

    provider.kill(42);

    assert_eq!(
        session.bytes(),
        Err(HostError::ProcessNotFound { pid: ProcessId(42) })
    );
    assert!(!session.is_attached());
    assert_eq!(provider.detached_count(), 1);
    assert!(matches!(
        session.capacity(),
        Err(HostError::SessionInvalid { .. })
    ));
}

#[test]
fn test_mode_is_kept() {
    let provider = FakeProvider::with_processes(&[42]);
    let key = LookupKey::new(ProcessId(42), Some("r")).unwrap();
    let session = Session::new(
        ProcessId(42),
        Some("r".to_string()),
        provider.resolve(&key).unwrap(),
    );

    assert_eq!(session.mode(), Some("r"));
}

#[test]
fn test_concurrent_detach_and_read() {
    let provider = FakeProvider::with_processes(&[42]);
    let session = attach(&provider, 42);

    std::thread::scope(|scope| {
        let reader = scope.spawn(|| {
            (0..500)
                .map(|_| session.bytes())
                .collect::<Vec<_>>()
        });
        scope.spawn(|| session.detach().unwrap());

        // Once a read fails, every later read fails too.
        let results = reader.join().unwrap();
        if let Some(first_failure) = results.iter().position(|r| r.is_err()) {
            assert!(results
                .iter()
                .skip(first_failure)
                .all(|r| matches!(r, Err(HostError::SessionInvalid { .. }))));
        }
    });

    assert_eq!(provider.detached_count(), 1);
}
