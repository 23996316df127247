//! Transaction engine.
//!
//! A [`Responder`] is fed one complete container per call. Commands without a
//! data phase are answered right away; commands followed by host data are
//! parked as the pending [`Transaction`] until the matching data block
//! arrives. At most one transaction is pending at a time.

use tracing::{debug, warn};

use super::consts::{ContainerType, OperationCode, ResponseCode, ALL_STORAGES};
use super::container::{self, Container, EncodeError, Params};
use super::operations::{self, DataPhase, ObjectTarget, OperationContext, Request, StorageParam};
use super::storage::{RegistryError, StorageBackend, StorageRegistry};
use crate::config::{ResponderConfig, StalePolicy};

/// A command waiting for its data phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub transaction_id: u32,
    pub operation: OperationCode,
    pub params: Params,
    /// Storage validated when the command was accepted.
    pub storage_id: Option<u32>,
}

/// Outcome of the last completed call, sent as the response container.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub code: ResponseCode,
    pub transaction_id: u32,
    pub params: Params,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Idle,
    AwaitingData,
}

/// Device side of the MTP transaction protocol.
pub struct Responder<'buf, B: StorageBackend> {
    config: ResponderConfig,
    registry: StorageRegistry<B>,
    data: &'buf mut [u8],
    data_len: usize,
    pending: Option<Transaction>,
    session: Option<u32>,
    object_target: Option<ObjectTarget>,
    response: Option<Response>,
}

impl<'buf, B: StorageBackend> Responder<'buf, B> {
    pub fn new(config: ResponderConfig) -> Self {
        Responder {
            config,
            registry: StorageRegistry::new(),
            data: &mut [],
            data_len: 0,
            pending: None,
            session: None,
            object_target: None,
            response: None,
        }
    }

    /// Hands the responder the scratch region used for outgoing data
    /// containers. Until one is set every device-to-host operation fails with
    /// IncompleteTransfer.
    pub fn set_data_buffer(&mut self, buffer: &'buf mut [u8]) {
        self.data = buffer;
        self.data_len = 0;
    }

    pub fn config(&self) -> &ResponderConfig {
        &self.config
    }

    pub fn register_storage(
        &mut self,
        storage_id: u32,
        backend: B,
        context: B::Context,
    ) -> Result<(), RegistryError> {
        self.registry.register(storage_id, backend, context)?;
        debug!("storage {:#010x} registered", storage_id);
        Ok(())
    }

    /// A transaction parked on the removed storage fails with
    /// InvalidStorageId when its data arrives.
    pub fn unregister_storage(&mut self, storage_id: u32) -> Option<(B, B::Context)> {
        let removed = self.registry.unregister(storage_id);
        if removed.is_some() {
            debug!("storage {:#010x} unregistered", storage_id);
        }
        removed
    }

    pub fn registry(&self) -> &StorageRegistry<B> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut StorageRegistry<B> {
        &mut self.registry
    }

    pub fn state(&self) -> State {
        if self.pending.is_some() {
            State::AwaitingData
        } else {
            State::Idle
        }
    }

    pub fn pending(&self) -> Option<&Transaction> {
        self.pending.as_ref()
    }

    pub fn session_id(&self) -> Option<u32> {
        self.session
    }

    /// Forgets the pending transaction, the session and the SendObject target,
    /// as after a USB reset.
    pub fn reset(&mut self) {
        if let Some(stale) = self.pending.take() {
            debug!("reset drops transaction {}", stale.transaction_id);
        }
        self.session = None;
        self.object_target = None;
        self.response = None;
        self.data_len = 0;
    }

    /// Data container produced by the last call, empty if there is none.
    pub fn data(&self) -> &[u8] {
        &self.data[..self.data_len]
    }

    pub fn response(&self) -> Option<&Response> {
        self.response.as_ref()
    }

    /// Encodes the response of the last call into `out`. Returns 0 when the
    /// last call accepted a command and is waiting for its data.
    pub fn encode_response(&self, out: &mut [u8]) -> Result<usize, EncodeError> {
        match &self.response {
            Some(response) => container::encode_params(
                out,
                ContainerType::Response,
                response.code.code(),
                response.transaction_id,
                &response.params,
            ),
            None => Ok(0),
        }
    }

    /// Processes one container from the host.
    ///
    /// Returns the response code, or `None` when a command was accepted and
    /// the responder now waits for its data block.
    pub fn handle_request(&mut self, request: &[u8]) -> Option<ResponseCode> {
        self.data_len = 0;
        self.response = None;

        let container = match container::decode(request) {
            Ok(container) => container,
            Err(err) => {
                warn!("rejected container: {}", err);
                let transaction_id = header_transaction_id(request);
                return Some(self.respond(transaction_id, ResponseCode::InvalidRequest, Params::new()));
            }
        };

        match container.kind {
            ContainerType::Command => self.handle_command(&container),
            ContainerType::Data => Some(self.handle_data(&container)),
            ContainerType::Response | ContainerType::Event => {
                warn!("unexpected {:?} block from host", container.kind);
                Some(self.respond(
                    container.transaction_id,
                    ResponseCode::InvalidRequest,
                    Params::new(),
                ))
            }
        }
    }

    fn handle_command(&mut self, command: &Container<'_>) -> Option<ResponseCode> {
        let transaction_id = command.transaction_id;

        if let Some(stale) = &self.pending {
            match self.config.stale_transaction {
                StalePolicy::Discard => {
                    warn!(
                        "transaction {} dropped before its data phase",
                        stale.transaction_id
                    );
                    self.pending = None;
                }
                StalePolicy::Reject => {
                    warn!(
                        "command {} refused, transaction {} still waits for data",
                        transaction_id, stale.transaction_id
                    );
                    return Some(self.respond(transaction_id, ResponseCode::DeviceBusy, Params::new()));
                }
            }
        }

        let Some(descriptor) = operations::descriptor(command.code) else {
            debug!("operation {:#06x} not supported", command.code);
            return Some(self.respond(
                transaction_id,
                ResponseCode::OperationNotSupported,
                Params::new(),
            ));
        };

        let params = command.param_vec();
        let storage_id = match descriptor.storage {
            StorageParam::None => None,
            StorageParam::AtOrAll(index) if params.get(index) == Some(&ALL_STORAGES) => None,
            StorageParam::At(index) | StorageParam::AtOrAll(index) => {
                let storage_id = params.get(index).copied().unwrap_or(0);
                if !self.registry.contains(storage_id) {
                    warn!("command {} names unknown storage {:#010x}", transaction_id, storage_id);
                    return Some(self.respond(
                        transaction_id,
                        ResponseCode::InvalidStorageId,
                        Params::new(),
                    ));
                }
                Some(storage_id)
            }
        };

        if descriptor.phase == DataPhase::HostToDevice {
            if let Err(code) =
                operations::accept_command(descriptor.operation, &params, self.object_target)
            {
                return Some(self.respond(transaction_id, code, Params::new()));
            }
            debug!(
                "transaction {} ({:?}) waits for data",
                transaction_id, descriptor.operation
            );
            self.pending = Some(Transaction {
                transaction_id,
                operation: descriptor.operation,
                params,
                storage_id,
            });
            return None;
        }

        Some(self.dispatch(transaction_id, descriptor.operation, &params, storage_id, &[]))
    }

    fn handle_data(&mut self, data: &Container<'_>) -> ResponseCode {
        let transaction_id = data.transaction_id;
        let Some(pending) = self.pending.take() else {
            warn!("data block {} without a pending command", transaction_id);
            return self.respond(transaction_id, ResponseCode::InvalidRequest, Params::new());
        };
        if pending.transaction_id != transaction_id || pending.operation as u16 != data.code {
            warn!(
                "data block {} ({:#06x}) does not belong to transaction {}",
                transaction_id, data.code, pending.transaction_id
            );
            return self.respond(transaction_id, ResponseCode::InvalidRequest, Params::new());
        }
        if let Some(storage_id) = pending.storage_id {
            if !self.registry.contains(storage_id) {
                return self.respond(transaction_id, ResponseCode::InvalidStorageId, Params::new());
            }
        }

        self.dispatch(
            transaction_id,
            pending.operation,
            &pending.params,
            pending.storage_id,
            data.payload,
        )
    }

    fn dispatch(
        &mut self,
        transaction_id: u32,
        operation: OperationCode,
        params: &[u32],
        storage_id: Option<u32>,
        payload: &[u8],
    ) -> ResponseCode {
        let request = Request {
            operation,
            transaction_id,
            params,
            storage_id,
            payload,
        };
        let mut ctx = OperationContext {
            registry: &mut self.registry,
            config: &self.config,
            session: &mut self.session,
            object_target: &mut self.object_target,
            data: &mut *self.data,
        };

        match operations::execute(&mut ctx, &request) {
            Ok(reply) => {
                self.data_len = reply.data_len;
                debug!("transaction {} ({:?}) completed", transaction_id, operation);
                self.respond(transaction_id, ResponseCode::Ok, reply.params)
            }
            Err(code) => {
                debug!(
                    "transaction {} ({:?}) failed: {:?}",
                    transaction_id, operation, code
                );
                self.respond(transaction_id, code, Params::new())
            }
        }
    }

    fn respond(&mut self, transaction_id: u32, code: ResponseCode, params: Params) -> ResponseCode {
        self.response = Some(Response {
            code,
            transaction_id,
            params,
        });
        code
    }
}

/// Best-effort transaction id of a container that failed to decode.
fn header_transaction_id(request: &[u8]) -> u32 {
    request
        .get(8..12)
        .map(|id| u32::from_le_bytes([id[0], id[1], id[2], id[3]]))
        .unwrap_or(0)
}
