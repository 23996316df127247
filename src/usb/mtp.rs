//! MTP class implementation.

use embassy_time::Timer;
use embassy_usb::driver::{Driver, Endpoint, EndpointError, EndpointIn, EndpointOut};
use embassy_usb::Builder;
use thiserror::Error;
use tracing::{trace, warn};

use crate::config::ResponderConfig;
use crate::mtp_handler::consts::{
    APPN_SPEC_SUBCLASS_MTP, HEADER_SIZE, MAX_PARAMS, MTP_PROTOCOL_MTP, USB_CLASS_APPN_SPEC,
};
use crate::mtp_handler::responder::Responder;
use crate::mtp_handler::storage::StorageBackend;

/// Largest bulk packet of a high-speed device.
const MAX_BULK_PACKET: usize = 512;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Error)]
pub enum TransportError {
    #[error("endpoint error: {0:?}")]
    Endpoint(EndpointError),
    #[error("container of {0} bytes does not fit the receive buffer")]
    Overflow(usize),
    #[error("container declares length {0}, shorter than its header")]
    BadLength(u32),
}

impl From<EndpointError> for TransportError {
    fn from(err: EndpointError) -> Self {
        TransportError::Endpoint(err)
    }
}

/// Collects bulk OUT packets until one whole container is buffered.
///
/// The first four bytes of a container give its total length, so the
/// assembler knows when to stop without relying on short packets. A
/// container larger than the buffer is reported once and its remaining
/// packets are swallowed.
pub struct ContainerAssembler<'b> {
    buf: &'b mut [u8],
    filled: usize,
    skip: usize,
    /// Header bytes of the last rejected container that actually arrived.
    rejected: usize,
}

impl<'b> ContainerAssembler<'b> {
    pub fn new(buf: &'b mut [u8]) -> Self {
        ContainerAssembler {
            buf,
            filled: 0,
            skip: 0,
            rejected: 0,
        }
    }

    /// Starts a new container. Bytes still owed by an oversized container are
    /// kept in the skip count.
    pub fn reset(&mut self) {
        self.filled = 0;
    }

    /// Appends one packet. Returns the container length once it is complete.
    pub fn push(&mut self, packet: &[u8]) -> Result<Option<usize>, TransportError> {
        if self.skip > 0 {
            self.skip = self.skip.saturating_sub(packet.len());
            return Ok(None);
        }

        let take = packet.len().min(self.buf.len() - self.filled);
        self.buf[self.filled..self.filled + take].copy_from_slice(&packet[..take]);
        self.filled += take;

        let Some(len) = self.declared_len() else {
            return Ok(None);
        };
        if len < HEADER_SIZE {
            self.reject();
            return Err(TransportError::BadLength(len as u32));
        }
        if len > self.buf.len() {
            let received = self.filled + (packet.len() - take);
            self.skip = len.saturating_sub(received);
            self.reject();
            return Err(TransportError::Overflow(len));
        }
        if self.filled >= len {
            Ok(Some(len))
        } else {
            Ok(None)
        }
    }

    /// The completed container of length `len`.
    pub fn container(&self, len: usize) -> &[u8] {
        &self.buf[..len.min(self.buf.len())]
    }

    /// Header of the last rejected container, cut to the bytes received for
    /// it. Shorter than a full header when the host sent less.
    pub fn header(&self) -> &[u8] {
        &self.buf[..self.rejected]
    }

    fn reject(&mut self) {
        self.rejected = self.filled.min(HEADER_SIZE);
        self.filled = 0;
    }

    fn declared_len(&self) -> Option<usize> {
        if self.filled < 4 {
            return None;
        }
        let len = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        Some(len as usize)
    }
}

/// Packet level implementation of the MTP bulk pipe.
///
/// - `read_packet` must be called with a buffer large enough to hold `max_packet_size` bytes.
/// - `write_packet` must not be called with a buffer larger than `max_packet_size` bytes.
/// - A transfer that is an exact multiple of `max_packet_size` is terminated with a
///   zero-length packet, otherwise the host keeps waiting for more data.
pub struct MtpClass<'d, D: Driver<'d>> {
    read_ep: D::EndpointOut,
    write_ep: D::EndpointIn,
}

impl<'d, D: Driver<'d>> MtpClass<'d, D> {
    /// Creates a new MtpClass with the provided UsbBus and `max_packet_size` in bytes. For
    /// full-speed devices, `max_packet_size` has to be one of 8, 16, 32 or 64.
    pub fn new(builder: &mut Builder<'d, D>, max_packet_size: u16) -> Self {
        let mut func = builder.function(USB_CLASS_APPN_SPEC, APPN_SPEC_SUBCLASS_MTP, MTP_PROTOCOL_MTP);
        let mut iface = func.interface();
        let mut alt = iface.alt_setting(USB_CLASS_APPN_SPEC, APPN_SPEC_SUBCLASS_MTP, MTP_PROTOCOL_MTP, None);
        let read_ep = alt.endpoint_bulk_out(max_packet_size);
        let write_ep = alt.endpoint_bulk_in(max_packet_size);

        drop(func);

        MtpClass { read_ep, write_ep }
    }

    /// Creates the class with the packet size of a validated `config`.
    pub fn from_config(builder: &mut Builder<'d, D>, config: &ResponderConfig) -> Self {
        Self::new(builder, config.max_packet_size)
    }

    /// Gets the maximum packet size in bytes.
    pub fn max_packet_size(&self) -> usize {
        // The size is the same for both endpoints.
        self.read_ep.info().max_packet_size.into()
    }

    /// Writes a single packet into the IN endpoint.
    pub async fn write_packet(&mut self, data: &[u8]) -> Result<(), EndpointError> {
        let len = core::cmp::min(data.len(), self.max_packet_size());
        self.write_ep.write(&data[..len]).await
    }

    /// Reads a single packet from the OUT endpoint.
    pub async fn read_packet(&mut self, data: &mut [u8]) -> Result<usize, EndpointError> {
        self.read_ep.read(data).await
    }

    /// Waits for the USB host to enable this interface
    pub async fn wait_connection(&mut self) {
        self.read_ep.wait_enabled().await;
    }

    /// Reads packets until `assembler` holds a complete container and returns
    /// its length.
    pub async fn read_container(
        &mut self,
        assembler: &mut ContainerAssembler<'_>,
    ) -> Result<usize, TransportError> {
        let mut packet = [0u8; MAX_BULK_PACKET];
        let packet_len = self.max_packet_size().min(MAX_BULK_PACKET);
        assembler.reset();
        loop {
            let n = self.read_packet(&mut packet[..packet_len]).await?;
            trace!("received {} byte packet", n);
            if let Some(len) = assembler.push(&packet[..n])? {
                return Ok(len);
            }
        }
    }

    /// Sends one container, split into packets.
    pub async fn write_container(&mut self, buf: &[u8]) -> Result<(), TransportError> {
        let max_packet_size = self.max_packet_size();
        for chunk in buf.chunks(max_packet_size) {
            if let Err(err) = self.write_packet(chunk).await {
                // Allow the USB stack some breathing room before the caller retries.
                Timer::after_millis(1).await;
                return Err(err.into());
            }
        }
        if !buf.is_empty() && buf.len() % max_packet_size == 0 {
            self.write_packet(&[]).await?;
        }
        Ok(())
    }

    /// Runs the bulk pipe against `responder` until an endpoint fails, for
    /// instance because the host went away.
    ///
    /// `receive` holds incoming containers; outgoing data containers are built
    /// in the responder's own data buffer.
    pub async fn serve<B: StorageBackend>(
        &mut self,
        responder: &mut Responder<'_, B>,
        receive: &mut [u8],
    ) -> Result<(), TransportError> {
        let mut assembler = ContainerAssembler::new(receive);
        let mut response = [0u8; HEADER_SIZE + 4 * MAX_PARAMS];

        loop {
            let code = match self.read_container(&mut assembler).await {
                Ok(len) => responder.handle_request(assembler.container(len)),
                Err(TransportError::Endpoint(err)) => return Err(err.into()),
                Err(err) => {
                    // The header alone fails to decode, which answers the
                    // host with InvalidRequest for its transaction.
                    warn!("dropping container: {}", err);
                    responder.handle_request(assembler.header())
                }
            };

            if !responder.data().is_empty() {
                self.write_container(responder.data()).await?;
            }
            if code.is_some() {
                match responder.encode_response(&mut response) {
                    Ok(len) => self.write_container(&response[..len]).await?,
                    Err(err) => warn!("cannot encode response: {}", err),
                }
            }
        }
    }
}
