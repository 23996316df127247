use mtp_responder::mtp_handler::consts::HEADER_SIZE;
use mtp_responder::mtp_handler::container::{self, DataReader};
use mtp_responder::mtp_handler::dataset;
use mtp_responder::mtp_handler::storage::{ParentFilter, StorageBackend, StorageError, StorageInfo};
use mtp_responder::{
    ContainerType, DatasetError, ObjectInfo, Responder, ResponderConfig, ResponseCode, StalePolicy,
    State,
};

const STORAGE: u32 = 0x0001_0001;

const SEND_OBJECT_INFO: [u8; 20] = [
    0x14, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0c, 0x10, 0xe2, 0x03, 0x00, 0x00, 0x01, 0x00, 0x01,
    0x00, 0xff, 0xff, 0xff, 0xff,
];

const SEND_OBJECT_INFO_WRONG_STORAGE: [u8; 20] = [
    0x14, 0x00, 0x00, 0x00, 0x01, 0x00, 0x0c, 0x10, 0xe2, 0x03, 0x00, 0x00, 0x01, 0x01, 0x00,
    0x01, 0xff, 0xff, 0xff, 0xff,
];

/// Data block of transaction 0x3e2 carrying a "welcome.txt" ObjectInfo.
const WELCOME_TXT_DATA: [u8; 92] = [
    0x5c, 0x00, 0x00, 0x00, 0x02, 0x00, 0x0c, 0x10, 0xe2, 0x03, 0x00, 0x00, //
    0x01, 0x00, 0x01, 0x00, 0x04, 0x30, 0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x0c, 0x77, 0x00, 0x65, 0x00, 0x6c, 0x00, 0x63,
    0x00, 0x6f, 0x00, 0x6d, 0x00, 0x65, 0x00, 0x2e, 0x00, 0x74, 0x00, 0x78, 0x00, 0x74, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Calls seen by the backend, kept in its registration context.
#[derive(Debug, Default)]
struct Calls {
    deserialize: usize,
    format_checks: usize,
    creates: usize,
    created: Option<ObjectInfo>,
    enumerations: u32,
}

struct RecordingBackend {
    reject_dataset: bool,
    format_supported: bool,
    create_result: Result<u32, StorageError>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        RecordingBackend {
            reject_dataset: false,
            format_supported: true,
            create_result: Ok(0x22),
        }
    }
}

impl StorageBackend for RecordingBackend {
    type Context = Calls;

    fn storage_info(&mut self, _ctx: &mut Calls) -> Result<StorageInfo, StorageError> {
        Err(StorageError::Unavailable)
    }

    fn is_format_supported(&mut self, ctx: &mut Calls, _format: u16) -> bool {
        ctx.format_checks += 1;
        self.format_supported
    }

    fn deserialize_object_info(
        &mut self,
        ctx: &mut Calls,
        bytes: &[u8],
    ) -> Result<ObjectInfo, DatasetError> {
        ctx.deserialize += 1;
        if self.reject_dataset {
            return Err(DatasetError::Truncated);
        }
        dataset::parse_object_info(bytes)
    }

    fn create(&mut self, ctx: &mut Calls, info: &ObjectInfo) -> Result<u32, StorageError> {
        ctx.creates += 1;
        ctx.created = Some(info.clone());
        self.create_result
    }

    fn stat(&mut self, _ctx: &mut Calls, _handle: u32) -> Result<ObjectInfo, StorageError> {
        Err(StorageError::NotFound)
    }

    /// Lists one more object on every call, like a storage that other
    /// writers fill in between two requests.
    fn enumerate(
        &mut self,
        ctx: &mut Calls,
        _format: Option<u16>,
        _parent: ParentFilter,
        visit: &mut dyn FnMut(u32),
    ) -> Result<(), StorageError> {
        ctx.enumerations += 1;
        (1..=ctx.enumerations).for_each(|handle| visit(handle));
        Ok(())
    }

    fn delete(&mut self, _ctx: &mut Calls, _handle: u32) -> Result<(), StorageError> {
        Err(StorageError::NotFound)
    }

    fn rename(&mut self, _ctx: &mut Calls, _handle: u32, _name: &str) -> Result<(), StorageError> {
        Err(StorageError::NotFound)
    }

    fn read(
        &mut self,
        _ctx: &mut Calls,
        _handle: u32,
        _offset: u64,
        _buf: &mut [u8],
    ) -> Result<usize, StorageError> {
        Err(StorageError::NotFound)
    }

    fn write(
        &mut self,
        _ctx: &mut Calls,
        _handle: u32,
        _offset: u64,
        _data: &[u8],
    ) -> Result<(), StorageError> {
        Err(StorageError::NotFound)
    }
}

fn responder_with<'buf>(backend: RecordingBackend) -> Responder<'buf, RecordingBackend> {
    responder_with_policy(backend, StalePolicy::Discard)
}

fn responder_with_policy<'buf>(
    backend: RecordingBackend,
    stale_transaction: StalePolicy,
) -> Responder<'buf, RecordingBackend> {
    let config = ResponderConfig {
        stale_transaction,
        ..ResponderConfig::default()
    };
    let mut responder = Responder::new(config);
    responder
        .register_storage(STORAGE, backend, Calls::default())
        .unwrap();
    responder
}

fn calls<'a>(responder: &'a mut Responder<'_, RecordingBackend>) -> &'a Calls {
    &responder.registry_mut().resolve(STORAGE).unwrap().context
}

fn with_transaction_id(container: &[u8], transaction_id: u32) -> Vec<u8> {
    let mut out = container.to_vec();
    out[8..12].copy_from_slice(&transaction_id.to_le_bytes());
    out
}

#[test]
fn command_phase_returns_no_data_and_no_response() {
    let mut responder = responder_with(RecordingBackend::default());

    assert_eq!(responder.handle_request(&SEND_OBJECT_INFO), None);
    assert!(responder.data().is_empty());
    assert_eq!(responder.state(), State::AwaitingData);
    assert_eq!(calls(&mut responder).deserialize, 0);
}

#[test]
fn command_for_unknown_storage_fails_without_backend_calls() {
    let mut responder = responder_with(RecordingBackend::default());

    assert_eq!(
        responder.handle_request(&SEND_OBJECT_INFO_WRONG_STORAGE),
        Some(ResponseCode::InvalidStorageId)
    );
    assert!(responder.data().is_empty());
    assert_eq!(responder.state(), State::Idle);

    let calls = calls(&mut responder);
    assert_eq!(calls.deserialize, 0);
    assert_eq!(calls.format_checks, 0);
    assert_eq!(calls.creates, 0);
}

#[test]
fn invalid_dataset_stops_before_format_check() {
    let mut responder = responder_with(RecordingBackend {
        reject_dataset: true,
        ..RecordingBackend::default()
    });

    responder.handle_request(&SEND_OBJECT_INFO);
    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::InvalidDataset)
    );
    assert_eq!(responder.state(), State::Idle);

    let calls = calls(&mut responder);
    assert_eq!(calls.deserialize, 1);
    assert_eq!(calls.format_checks, 0);
    assert_eq!(calls.creates, 0);
}

#[test]
fn truncated_dataset_is_rejected_by_default_parser() {
    let mut responder = responder_with(RecordingBackend::default());
    let mut truncated = WELCOME_TXT_DATA[..70].to_vec();
    truncated[0] = 70;

    responder.handle_request(&SEND_OBJECT_INFO);
    assert_eq!(
        responder.handle_request(&truncated),
        Some(ResponseCode::InvalidDataset)
    );
    assert_eq!(calls(&mut responder).creates, 0);
}

#[test]
fn unsupported_format_never_creates() {
    let mut responder = responder_with(RecordingBackend {
        format_supported: false,
        ..RecordingBackend::default()
    });

    responder.handle_request(&SEND_OBJECT_INFO);
    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::InvalidObjectFormatCode)
    );

    let calls = calls(&mut responder);
    assert_eq!(calls.format_checks, 1);
    assert_eq!(calls.creates, 0);
}

#[test]
fn create_failure_is_store_not_available() {
    let mut responder = responder_with(RecordingBackend {
        create_result: Err(StorageError::Full),
        ..RecordingBackend::default()
    });

    responder.handle_request(&SEND_OBJECT_INFO);
    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::StoreNotAvailable)
    );
    assert_eq!(calls(&mut responder).creates, 1);
}

#[test]
fn successful_create_reports_handle() {
    let mut responder = responder_with(RecordingBackend::default());

    assert_eq!(responder.handle_request(&SEND_OBJECT_INFO), None);
    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::Ok)
    );
    assert!(responder.data().is_empty());
    assert_eq!(responder.state(), State::Idle);

    let response = responder.response().unwrap();
    assert_eq!(response.transaction_id, 0x03e2);
    assert_eq!(response.params.as_slice(), &[STORAGE, 0xFFFF_FFFF, 0x22]);

    let mut out = [0u8; 32];
    let len = responder.encode_response(&mut out).unwrap();
    assert_eq!(len, HEADER_SIZE + 12);
    assert_eq!(&out[4..8], &[0x03, 0x00, 0x01, 0x20]);

    let created = calls(&mut responder).created.clone().unwrap();
    assert_eq!(created.filename.as_str(), "welcome.txt");
    assert_eq!(created.object_format, 0x3004);
    assert_eq!(created.storage_id, STORAGE);
}

#[test]
fn mismatched_transaction_id_is_rejected_then_recovers() {
    let mut responder = responder_with(RecordingBackend::default());

    responder.handle_request(&SEND_OBJECT_INFO);
    assert_eq!(
        responder.handle_request(&with_transaction_id(&WELCOME_TXT_DATA, 0x03e3)),
        Some(ResponseCode::InvalidRequest)
    );
    assert_eq!(responder.state(), State::Idle);
    assert_eq!(calls(&mut responder).deserialize, 0);

    assert_eq!(responder.handle_request(&SEND_OBJECT_INFO), None);
    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::Ok)
    );
}

#[test]
fn data_without_command_is_rejected() {
    let mut responder = responder_with(RecordingBackend::default());

    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::InvalidRequest)
    );
    assert_eq!(calls(&mut responder).deserialize, 0);
}

#[test]
fn repeated_data_block_is_rejected() {
    let mut responder = responder_with(RecordingBackend::default());

    responder.handle_request(&SEND_OBJECT_INFO);
    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::Ok)
    );
    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::InvalidRequest)
    );
    assert_eq!(calls(&mut responder).creates, 1);
}

#[test]
fn malformed_containers_change_nothing() {
    let mut responder = responder_with(RecordingBackend::default());
    responder.handle_request(&SEND_OBJECT_INFO);

    // shorter than a header
    assert_eq!(
        responder.handle_request(&SEND_OBJECT_INFO[..11]),
        Some(ResponseCode::InvalidRequest)
    );
    // declared length disagrees with the delivered bytes
    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA[..80]),
        Some(ResponseCode::InvalidRequest)
    );
    assert_eq!(responder.state(), State::AwaitingData);

    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::Ok)
    );
}

#[test]
fn new_command_discards_stale_transaction() {
    let mut responder = responder_with(RecordingBackend::default());

    responder.handle_request(&SEND_OBJECT_INFO);
    let second = with_transaction_id(&SEND_OBJECT_INFO, 0x03e3);
    assert_eq!(responder.handle_request(&second), None);
    assert_eq!(responder.pending().unwrap().transaction_id, 0x03e3);

    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::InvalidRequest)
    );

    responder.handle_request(&second);
    assert_eq!(
        responder.handle_request(&with_transaction_id(&WELCOME_TXT_DATA, 0x03e3)),
        Some(ResponseCode::Ok)
    );
}

#[test]
fn reject_policy_answers_device_busy() {
    let mut responder = responder_with_policy(RecordingBackend::default(), StalePolicy::Reject);

    responder.handle_request(&SEND_OBJECT_INFO);
    let second = with_transaction_id(&SEND_OBJECT_INFO, 0x03e3);
    assert_eq!(
        responder.handle_request(&second),
        Some(ResponseCode::DeviceBusy)
    );
    assert_eq!(responder.response().unwrap().transaction_id, 0x03e3);

    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::Ok)
    );
}

#[test]
fn storage_removed_during_data_phase() {
    let mut responder = responder_with(RecordingBackend::default());

    responder.handle_request(&SEND_OBJECT_INFO);
    let (_, calls) = responder.unregister_storage(STORAGE).unwrap();
    assert_eq!(calls.deserialize, 0);

    assert_eq!(
        responder.handle_request(&WELCOME_TXT_DATA),
        Some(ResponseCode::InvalidStorageId)
    );
    assert_eq!(responder.state(), State::Idle);
}

#[test]
fn handle_list_is_taken_in_one_enumeration() {
    let mut scratch = [0u8; 128];
    let mut responder = responder_with(RecordingBackend::default());
    responder.set_data_buffer(&mut scratch);

    for (transaction_id, expected) in [(1u32, 1u32), (2, 2)] {
        let mut command = [0u8; 24];
        let len = container::encode_params(
            &mut command,
            ContainerType::Command,
            0x1007,
            transaction_id,
            &[STORAGE, 0, 0],
        )
        .unwrap();
        assert_eq!(
            responder.handle_request(&command[..len]),
            Some(ResponseCode::Ok)
        );

        let data = container::decode(responder.data()).unwrap();
        let mut reader = DataReader::new(data.payload);
        assert_eq!(reader.read_u32(), Some(expected));
        let handles: Vec<u32> = (0..expected).map(|_| reader.read_u32().unwrap()).collect();
        assert_eq!(handles, (1..=expected).collect::<Vec<_>>());
        assert_eq!(reader.remaining(), 0);
    }
    assert_eq!(calls(&mut responder).enumerations, 2);
}
