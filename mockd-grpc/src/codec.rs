//! Server-side dynamic codecs: decode the *request* against a descriptor
//! and encode the *response*, the mirror image of a dynamic client
//! codec that encodes requests and decodes responses.

use prost::Message;
use prost_reflect::{DynamicMessage, MessageDescriptor};
use tonic::codec::{BufferSettings, Codec, Decoder, Encoder};
use tonic::Status;

/// Decodes request bytes against `request_desc`; encoding needs no
/// descriptor of its own because a `DynamicMessage` already carries the
/// descriptor it was constructed with.
#[derive(Clone)]
pub struct DynamicServerCodec {
    request_desc: MessageDescriptor,
}

impl DynamicServerCodec {
    pub fn new(request_desc: MessageDescriptor) -> Self {
        Self { request_desc }
    }
}

impl Codec for DynamicServerCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicMessageEncoder;
    type Decoder = DynamicMessageDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicMessageEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicMessageDecoder {
            request_desc: self.request_desc.clone(),
        }
    }
}

#[derive(Clone)]
pub struct DynamicMessageEncoder;

impl Encoder for DynamicMessageEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(
        &mut self,
        item: Self::Item,
        dst: &mut tonic::codec::EncodeBuf<'_>,
    ) -> Result<(), Self::Error> {
        item.encode(dst)
            .map_err(|e| Status::internal(format!("failed to encode response: {e}")))
    }

    fn buffer_settings(&self) -> BufferSettings {
        BufferSettings::default()
    }
}

#[derive(Clone)]
pub struct DynamicMessageDecoder {
    request_desc: MessageDescriptor,
}

impl Decoder for DynamicMessageDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(
        &mut self,
        src: &mut tonic::codec::DecodeBuf<'_>,
    ) -> Result<Option<Self::Item>, Self::Error> {
        let msg = DynamicMessage::decode(self.request_desc.clone(), src)
            .map_err(|e| Status::invalid_argument(format!("failed to decode request: {e}")))?;
        Ok(Some(msg))
    }

    fn buffer_settings(&self) -> BufferSettings {
        BufferSettings::default()
    }
}

/// A codec that reads and writes nothing, used only for the "service or
/// method not found" fallback path, where there is no
/// descriptor to decode against at all. Routing the unknown-method case
/// through `tonic::server::Grpc` (instead of hand-building an HTTP/2
/// trailers frame) reuses the exact same error-to-wire-format logic the
/// configured paths use.
#[derive(Clone, Default)]
pub struct UnitCodec;

impl Codec for UnitCodec {
    type Encode = ();
    type Decode = ();
    type Encoder = UnitCoder;
    type Decoder = UnitCoder;

    fn encoder(&mut self) -> Self::Encoder {
        UnitCoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        UnitCoder
    }
}

#[derive(Clone)]
pub struct UnitCoder;

impl Encoder for UnitCoder {
    type Item = ();
    type Error = Status;

    fn encode(&mut self, _item: (), _dst: &mut tonic::codec::EncodeBuf<'_>) -> Result<(), Self::Error> {
        Ok(())
    }
}

impl Decoder for UnitCoder {
    type Item = ();
    type Error = Status;

    fn decode(&mut self, _src: &mut tonic::codec::DecodeBuf<'_>) -> Result<Option<()>, Self::Error> {
        Ok(Some(()))
    }
}
