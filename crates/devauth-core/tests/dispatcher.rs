use std::thread;
use std::time::Duration;

use devauth_common::{DevAuthConfig, OperationCode, PakeAlg, UserType};
use devauth_core::iso::{IsoClientTask, IsoServerTask};
use devauth_core::{
    DispatchOutcome, ExchangeParams, IsoParams, Message, ProtocolError, TaskDispatcher,
};
use devauth_crypto::SecretBytes;

fn iso_params(own: &[u8]) -> IsoParams {
    IsoParams::new(
        ExchangeParams::new(OperationCode::Bind, own.to_vec(), SecretBytes::from_slice(b"123456")),
        UserType::Controller,
    )
}

fn config(max_tasks: usize) -> DevAuthConfig {
    DevAuthConfig {
        max_tasks,
        ..DevAuthConfig::default()
    }
}

#[test]
fn test_register_rejects_duplicate_id() {
    let dispatcher = TaskDispatcher::new(DevAuthConfig::default());
    dispatcher
        .register(1, IsoServerTask::new(iso_params(b"server")).unwrap())
        .unwrap();
    let err = dispatcher
        .register(1, IsoServerTask::new(iso_params(b"server")).unwrap())
        .unwrap_err();
    assert!(matches!(err, ProtocolError::InvalidParams(_)));
    assert_eq!(dispatcher.len(), 1);
}

#[test]
fn test_register_respects_table_capacity() {
    let dispatcher = TaskDispatcher::new(config(2));
    for id in 0..2 {
        dispatcher
            .register(id, IsoServerTask::new(iso_params(b"server")).unwrap())
            .unwrap();
    }
    let err = dispatcher
        .register(2, IsoServerTask::new(iso_params(b"server")).unwrap())
        .unwrap_err();
    assert!(matches!(err, ProtocolError::AllocFailure(_)));

    assert!(dispatcher.destroy(0));
    dispatcher
        .register(2, IsoServerTask::new(iso_params(b"server")).unwrap())
        .unwrap();
}

#[test]
fn test_unknown_request_id() {
    let dispatcher = TaskDispatcher::new(DevAuthConfig::default());
    let err = dispatcher.process_data(99, b"{}").unwrap_err();
    assert!(matches!(err.error, ProtocolError::InvalidParams(_)));
    assert!(err.outbound.is_none());
    assert!(!dispatcher.destroy(99));
}

#[test]
fn test_malformed_bytes_remove_task() {
    let dispatcher = TaskDispatcher::new(DevAuthConfig::default());
    dispatcher
        .register(5, IsoServerTask::new(iso_params(b"server")).unwrap())
        .unwrap();
    let err = dispatcher.process_data(5, b"[1, 2, 3]").unwrap_err();
    assert!(matches!(err.error, ProtocolError::BadMessage(_)));
    assert!(!dispatcher.contains(5));
}

#[test]
fn test_start_rejects_bad_key_length() {
    let dispatcher = TaskDispatcher::new(DevAuthConfig::default());
    let mut start = Message::new();
    start.add_int(devauth_common::field::KEY_LENGTH, 4);
    let err = dispatcher
        .start(3, IsoClientTask::new(iso_params(b"client")).unwrap(), &start)
        .unwrap_err();
    assert!(matches!(err.error, ProtocolError::InvalidParams(_)));
    assert!(dispatcher.is_empty());
}

#[test]
fn test_evict_idle_tasks() {
    let dispatcher = TaskDispatcher::new(DevAuthConfig::default());
    for id in 0..3 {
        dispatcher
            .register(id, IsoServerTask::new(iso_params(b"server")).unwrap())
            .unwrap();
    }
    assert_eq!(dispatcher.evict_older_than(Duration::from_secs(3600)), 0);
    assert_eq!(dispatcher.evict_older_than(Duration::ZERO), 3);
    assert!(dispatcher.is_empty());
}

#[test]
fn test_distinct_ids_run_concurrently() {
    let client_side = TaskDispatcher::new(DevAuthConfig::default());
    let server_side = TaskDispatcher::new(DevAuthConfig::default());

    thread::scope(|scope| {
        for id in 0..8i64 {
            let client_side = &client_side;
            let server_side = &server_side;
            scope.spawn(move || {
                server_side
                    .register(id, IsoServerTask::new(iso_params(b"server")).unwrap())
                    .unwrap();
                let client = IsoClientTask::new(iso_params(b"client")).unwrap();
                let mut outcome = client_side.start(id, client, &Message::new()).unwrap();
                let mut to_server = true;
                loop {
                    let bytes = match outcome {
                        DispatchOutcome::Continue { outbound: Some(bytes) } => bytes,
                        DispatchOutcome::Finish { outbound: Some(bytes), .. } => bytes,
                        DispatchOutcome::Finish { outbound: None, session_key } => {
                            assert_eq!(session_key.unwrap().len(), 32);
                            break;
                        }
                        other => panic!("request {id}: unexpected {other:?}"),
                    };
                    outcome = if to_server {
                        server_side.process_data(id, &bytes).unwrap()
                    } else {
                        client_side.process_data(id, &bytes).unwrap()
                    };
                    to_server = !to_server;
                }
            });
        }
    });

    assert!(client_side.is_empty());
    assert!(server_side.is_empty());
}

#[test]
fn test_params_follow_configuration() {
    let dispatcher = TaskDispatcher::new(DevAuthConfig {
        default_key_length: 64,
        pake_algorithms: vec!["EC_SPEKE".to_string()],
        ..DevAuthConfig::default()
    });
    let secret = || SecretBytes::from_slice(b"1");
    let base = dispatcher.exchange_params(OperationCode::Bind, b"server".to_vec(), secret());
    assert_eq!(base.key_len, 64);
    let pake = dispatcher.pake_params(base).unwrap();
    assert_eq!(pake.alg, PakeAlg::EC_SPEKE);
    assert_eq!(pake.base.key_len, 64);

    let misconfigured = TaskDispatcher::new(DevAuthConfig {
        pake_algorithms: vec!["DL_SPEKE".to_string()],
        ..DevAuthConfig::default()
    });
    let base = misconfigured.exchange_params(OperationCode::Bind, b"server".to_vec(), secret());
    assert!(matches!(
        misconfigured.pake_params(base),
        Err(ProtocolError::InvalidParams(_))
    ));
}
