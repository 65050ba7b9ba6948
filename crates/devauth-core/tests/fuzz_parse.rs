use devauth_common::{DevAuthConfig, OperationCode, PakeAlg, UserType};
use devauth_core::iso::{IsoClientTask, IsoServerTask};
use devauth_core::pake::PakeServerTask;
use devauth_core::{
    DispatchOutcome, ExchangeParams, IsoParams, Message, PakeParams, ProtocolTask, TaskDispatcher,
};
use devauth_crypto::SecretBytes;
use rand::{thread_rng, Rng};

fn iso_server() -> IsoServerTask {
    IsoServerTask::new(IsoParams::new(
        ExchangeParams::new(OperationCode::Bind, b"server".to_vec(), SecretBytes::from_slice(b"123456")),
        UserType::Accessory,
    ))
    .unwrap()
}

#[test]
fn fuzz_message_parse_never_panics() {
    let mut rng = thread_rng();
    for _ in 0..10_000 {
        let len: usize = rng.gen_range(0..512);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        let _ = Message::parse(&data);
    }
}

#[test]
fn fuzz_dispatch_random_bytes_never_panics() {
    let dispatcher = TaskDispatcher::new(DevAuthConfig::default());
    let mut rng = thread_rng();
    for id in 0..2_000i64 {
        if id % 2 == 0 {
            dispatcher.register(id, iso_server()).unwrap();
        } else {
            let server = PakeServerTask::new(PakeParams::new(
                ExchangeParams::new(OperationCode::Bind, b"server".to_vec(), SecretBytes::from_slice(b"1")),
                PakeAlg::EC_SPEKE,
            ))
            .unwrap();
            dispatcher.register(id, server).unwrap();
        }
        let len: usize = rng.gen_range(0..512);
        let mut data = vec![0u8; len];
        rng.fill(&mut data[..]);
        if dispatcher.process_data(id, &data).is_ok() {
            dispatcher.destroy(id);
        }
    }
    assert!(dispatcher.is_empty());
}

#[test]
fn random_mutation_of_valid_start_is_handled() {
    let mut client = IsoClientTask::new(IsoParams::new(
        ExchangeParams::new(OperationCode::Bind, b"client".to_vec(), SecretBytes::from_slice(b"123456")),
        UserType::Controller,
    ))
    .unwrap();
    let start = client
        .process(&Message::new())
        .unwrap()
        .send_to_peer
        .unwrap()
        .to_bytes()
        .unwrap();

    let dispatcher = TaskDispatcher::new(DevAuthConfig::default());
    let mut rng = thread_rng();
    for id in 0..1_000i64 {
        let mut mutated = start.clone();
        let flip_count = rng.gen_range(1..6);
        for _ in 0..flip_count {
            let idx = rng.gen_range(0..mutated.len());
            mutated[idx] ^= rng.gen::<u8>();
        }
        dispatcher.register(id, iso_server()).unwrap();
        match dispatcher.process_data(id, &mutated) {
            Ok(DispatchOutcome::Continue { .. }) => {
                dispatcher.destroy(id);
            }
            Ok(other) => panic!("mutated start finished the exchange: {other:?}"),
            Err(_) => assert!(!dispatcher.contains(id)),
        }
    }
    assert!(dispatcher.is_empty());
}
