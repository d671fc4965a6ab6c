//! FLAP framing over async byte streams.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use super::buf::take_u32;
use super::snac::{Decode, Encode, SnacBody, SnacFrame};
use super::tlv::TlvList;
use super::WireError;

const FLAP_START_MARKER: u8 = 0x2A;
const FLAP_HEADER_LEN: usize = 6;
const FLAP_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Signon,
    Data,
    Error,
    Signoff,
    KeepAlive,
}

impl FrameType {
    fn from_u8(b: u8) -> Result<Self, WireError> {
        match b {
            0x01 => Ok(Self::Signon),
            0x02 => Ok(Self::Data),
            0x03 => Ok(Self::Error),
            0x04 => Ok(Self::Signoff),
            0x05 => Ok(Self::KeepAlive),
            other => Err(WireError::UnknownFrameType(other)),
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Signon => 0x01,
            Self::Data => 0x02,
            Self::Error => 0x03,
            Self::Signoff => 0x04,
            Self::KeepAlive => 0x05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlapFrame {
    pub frame_type: FrameType,
    pub sequence: u16,
    pub payload: Bytes,
}

impl FlapFrame {
    fn expect(self, expected: FrameType) -> Result<Self, WireError> {
        if self.frame_type != expected {
            return Err(WireError::UnexpectedFrameType {
                expected,
                got: self.frame_type,
            });
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlapSignonFrame {
    pub version: u32,
    pub tlvs: TlvList,
}

/// Reading half of a FLAP connection.
pub struct FlapReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin + Send> FlapReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Read one FLAP frame. A clean close between frames yields [`WireError::Closed`].
    pub async fn receive_flap(&mut self) -> Result<FlapFrame, WireError> {
        let mut header = [0u8; FLAP_HEADER_LEN];
        // EOF before the first header byte is a clean close; anywhere later the frame was cut off
        if let Err(e) = self.inner.read_exact(&mut header[..1]).await {
            return Err(match e.kind() {
                std::io::ErrorKind::UnexpectedEof => WireError::Closed,
                _ => WireError::Io(e),
            });
        }
        self.inner.read_exact(&mut header[1..]).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => WireError::UnexpectedEof,
            _ => WireError::Io(e),
        })?;
        if header[0] != FLAP_START_MARKER {
            return Err(WireError::BadStartMarker(header[0]));
        }
        let frame_type = FrameType::from_u8(header[1])?;
        let sequence = u16::from_be_bytes([header[2], header[3]]);
        let len = u16::from_be_bytes([header[4], header[5]]) as usize;
        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => WireError::UnexpectedEof,
            _ => WireError::Io(e),
        })?;
        Ok(FlapFrame {
            frame_type,
            sequence,
            payload: Bytes::from(payload),
        })
    }

    pub async fn receive_signon_frame(&mut self) -> Result<FlapSignonFrame, WireError> {
        let mut payload = self.receive_flap().await?.expect(FrameType::Signon)?.payload;
        Ok(FlapSignonFrame {
            version: take_u32(&mut payload)?,
            tlvs: TlvList::decode_rest(&mut payload)?,
        })
    }

    /// Read a data frame and decode it as `T`, failing if it carries another classification.
    pub async fn receive_snac<T: SnacBody>(&mut self) -> Result<(SnacFrame, T), WireError> {
        let mut payload = self.receive_flap().await?.expect(FrameType::Data)?.payload;
        let frame = SnacFrame::decode(&mut payload)?;
        if !frame.is(T::FOOD_GROUP, T::SUB_GROUP) {
            return Err(WireError::UnexpectedSnac {
                expected: T::frame(),
                got: frame,
            });
        }
        let body = T::decode(&mut payload)?;
        Ok((frame, body))
    }
}

/// Writing half of a FLAP connection. Numbers outgoing frames.
pub struct FlapWriter<W> {
    inner: W,
    sequence: u16,
}

impl<W: AsyncWrite + Unpin + Send> FlapWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, sequence: 0 }
    }

    pub async fn send_flap(&mut self, frame_type: FrameType, payload: &[u8]) -> Result<(), WireError> {
        let len = u16::try_from(payload.len()).map_err(|_| WireError::TooLong("FLAP payload"))?;
        let mut buf = BytesMut::with_capacity(FLAP_HEADER_LEN + payload.len());
        buf.put_u8(FLAP_START_MARKER);
        buf.put_u8(frame_type.as_u8());
        buf.put_u16(self.sequence);
        buf.put_u16(len);
        buf.put_slice(payload);
        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    pub async fn send_signon_frame(&mut self, tlvs: &TlvList) -> Result<(), WireError> {
        let mut buf = BytesMut::new();
        buf.put_u32(FLAP_VERSION);
        tlvs.encode_rest(&mut buf)?;
        self.send_flap(FrameType::Signon, &buf).await
    }

    pub async fn send_snac<T: SnacBody>(&mut self, body: &T) -> Result<(), WireError> {
        let mut buf = BytesMut::new();
        T::frame().encode(&mut buf)?;
        body.encode(&mut buf)?;
        self.send_flap(FrameType::Data, &buf).await
    }

    pub async fn send_signoff(&mut self) -> Result<(), WireError> {
        self.send_flap(FrameType::Signoff, &[]).await
    }
}

/// A FLAP connection: both halves together, for the sequential handshake phases.
pub struct FlapClient<R, W> {
    reader: FlapReader<R>,
    writer: FlapWriter<W>,
}

impl FlapClient<OwnedReadHalf, OwnedWriteHalf> {
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (r, w) = stream.into_split();
        Self::new(r, w)
    }
}

impl<R, W> FlapClient<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: FlapReader::new(reader),
            writer: FlapWriter::new(writer),
        }
    }

    pub async fn receive_flap(&mut self) -> Result<FlapFrame, WireError> {
        self.reader.receive_flap().await
    }

    pub async fn receive_signon_frame(&mut self) -> Result<FlapSignonFrame, WireError> {
        self.reader.receive_signon_frame().await
    }

    pub async fn receive_snac<T: SnacBody>(&mut self) -> Result<(SnacFrame, T), WireError> {
        self.reader.receive_snac().await
    }

    pub async fn send_signon_frame(&mut self, tlvs: &TlvList) -> Result<(), WireError> {
        self.writer.send_signon_frame(tlvs).await
    }

    pub async fn send_snac<T: SnacBody>(&mut self, body: &T) -> Result<(), WireError> {
        self.writer.send_snac(body).await
    }

    pub async fn send_signoff(&mut self) -> Result<(), WireError> {
        self.writer.send_signoff().await
    }

    pub fn into_split(self) -> (FlapReader<R>, FlapWriter<W>) {
        (self.reader, self.writer)
    }
}
