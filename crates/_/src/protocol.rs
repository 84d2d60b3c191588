use std::io::{Error, ErrorKind, Read, Result, Write};

/// Count value carried in the header of frames that bear no payload.
pub(crate) const NO_PAYLOAD: i64 = -1;

/// Byte length of the `(count, tag)` pair embedded in handshake frames.
const METADATA_SIZE: usize = 2 * std::mem::size_of::<i64>();

/// Message class of point-to-point traffic. User tags are non-negative;
/// the negative tag space is reserved for the runtime's control protocol
/// and never reaches user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag(i64);

impl Tag {
    /// Receive-side wildcard: matches any non-reserved tag.
    pub const ANY: Self = Self(0);

    /// Payload-less rendezvous marker of the collective phases.
    pub(crate) const NO_MESSAGE: Self = Self(-2);
    /// Payload carrier of the broadcast downward phase.
    pub(crate) const BROADCAST: Self = Self(-3);
    /// Conclusion of the mutual-wait handshake.
    pub(crate) const DEADLOCK: Self = Self(-4);
    /// Advertisement that the sender blocks on a receive from us.
    pub(crate) const WAITING: Self = Self(-5);
    /// Acknowledgement that an advertised send was consumed.
    pub(crate) const RECEIVED: Self = Self(-6);
    /// Reduction carriers, one per operator.
    pub(crate) const MAX: Self = Self(-7);
    pub(crate) const MIN: Self = Self(-8);
    pub(crate) const SUM: Self = Self(-9);
    pub(crate) const PROD: Self = Self(-10);

    /// Creates a user tag.
    pub const fn new(value: u32) -> Self {
        Self(value as i64)
    }

    pub const fn value(&self) -> i64 {
        self.0
    }

    pub(crate) const fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// True for tags user code may send and receive; reserved tags are not.
    pub(crate) const fn is_user(&self) -> bool {
        self.0 >= Self::ANY.0
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#tag:{}", self.0)
    }
}

/// Elementwise operator applied by reductions. Payloads are treated as
/// arrays of unsigned 8-bit values; `Sum` and `Prod` wrap modulo 2^8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReduceOp {
    Max,
    Min,
    Sum,
    Prod,
}

impl ReduceOp {
    /// The reserved tag carrying this operator's upward-phase traffic.
    pub(crate) const fn tag(&self) -> Tag {
        match self {
            ReduceOp::Max => Tag::MAX,
            ReduceOp::Min => Tag::MIN,
            ReduceOp::Sum => Tag::SUM,
            ReduceOp::Prod => Tag::PROD,
        }
    }

    pub(crate) const fn from_tag(tag: Tag) -> Option<Self> {
        match tag {
            Tag::MAX => Some(ReduceOp::Max),
            Tag::MIN => Some(ReduceOp::Min),
            Tag::SUM => Some(ReduceOp::Sum),
            Tag::PROD => Some(ReduceOp::Prod),
            _ => None,
        }
    }

    /// Folds `incoming` into `accumulator` elementwise.
    pub(crate) fn apply(&self, incoming: &[u8], accumulator: &mut [u8]) {
        for (acc, inc) in accumulator.iter_mut().zip(incoming) {
            *acc = match self {
                ReduceOp::Max => (*acc).max(*inc),
                ReduceOp::Min => (*acc).min(*inc),
                ReduceOp::Sum => acc.wrapping_add(*inc),
                ReduceOp::Prod => acc.wrapping_mul(*inc),
            };
        }
    }
}

/// One unit of traffic on a link: a fixed header of two little-endian
/// signed 64-bit ints, `count` then `tag`, followed by `count` payload
/// bytes when the tag is payload-bearing. `NoMessage` and `Deadlock`
/// frames carry no payload and use the sentinel count; `Waiting` and
/// `Received` frames embed the `(count, tag)` pair they advertise as a
/// fixed 16-byte payload.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Frame {
    /// User messages plus the broadcast and reduction carriers.
    Payload { tag: Tag, data: Vec<u8> },
    /// Rendezvous marker of the collective phases.
    NoMessage,
    /// Conclusion of the mutual-wait handshake.
    Deadlock,
    /// The sender blocks on a receive matching `(count, tag)` from us.
    Waiting { count: i64, tag: Tag },
    /// A send of ours matching `(count, tag)` was consumed by the sender.
    Received { count: i64, tag: Tag },
}

impl Frame {
    pub fn write(&self, stream: &mut dyn Write) -> Result<()> {
        match self {
            Frame::Payload { tag, data } => {
                write_header(stream, data.len() as i64, *tag)?;
                stream.write_all(data)?;
            }
            Frame::NoMessage => {
                write_header(stream, NO_PAYLOAD, Tag::NO_MESSAGE)?;
            }
            Frame::Deadlock => {
                write_header(stream, NO_PAYLOAD, Tag::DEADLOCK)?;
            }
            Frame::Waiting { count, tag } => {
                write_header(stream, METADATA_SIZE as i64, Tag::WAITING)?;
                write_header(stream, *count, *tag)?;
            }
            Frame::Received { count, tag } => {
                write_header(stream, METADATA_SIZE as i64, Tag::RECEIVED)?;
                write_header(stream, *count, *tag)?;
            }
        }
        Ok(())
    }

    pub fn read(stream: &mut dyn Read) -> Result<Frame> {
        let count = read_int(stream)?;
        let tag = Tag::from_raw(read_int(stream)?);
        match tag {
            Tag::NO_MESSAGE => Ok(Frame::NoMessage),
            Tag::DEADLOCK => Ok(Frame::Deadlock),
            Tag::WAITING => {
                let (count, tag) = read_metadata(stream)?;
                Ok(Frame::Waiting { count, tag })
            }
            Tag::RECEIVED => {
                let (count, tag) = read_metadata(stream)?;
                Ok(Frame::Received { count, tag })
            }
            _ => {
                if count < 0 {
                    return Err(Error::new(
                        ErrorKind::InvalidData,
                        "Negative payload length",
                    ));
                }
                let mut data = vec![0u8; count as usize];
                stream.read_exact(&mut data)?;
                Ok(Frame::Payload { tag, data })
            }
        }
    }
}

fn write_header(stream: &mut dyn Write, count: i64, tag: Tag) -> Result<()> {
    stream.write_all(&count.to_le_bytes())?;
    stream.write_all(&tag.value().to_le_bytes())?;
    Ok(())
}

fn read_int(stream: &mut dyn Read) -> Result<i64> {
    let mut bytes = [0u8; std::mem::size_of::<i64>()];
    stream.read_exact(&mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

fn read_metadata(stream: &mut dyn Read) -> Result<(i64, Tag)> {
    let count = read_int(stream)?;
    let tag = Tag::from_raw(read_int(stream)?);
    Ok((count, tag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_async() {
        fn is_send<T: Send>() {}

        is_send::<Frame>();
        is_send::<Tag>();
    }

    #[test]
    fn test_frame_payload() {
        let frame = Frame::Payload {
            tag: Tag::new(7),
            data: vec![1, 2, 3, 4, 5],
        };
        let mut buffer = Vec::new();
        frame.write(&mut buffer).unwrap();
        assert_eq!(buffer.len(), 16 + 5);
        let mut cursor = Cursor::new(buffer);
        let read_frame = Frame::read(&mut cursor).unwrap();
        assert_eq!(read_frame, frame);
    }

    #[test]
    fn test_frame_empty_payload() {
        let frame = Frame::Payload {
            tag: Tag::ANY,
            data: Vec::new(),
        };
        let mut buffer = Vec::new();
        frame.write(&mut buffer).unwrap();
        assert_eq!(buffer.len(), 16);
        let mut cursor = Cursor::new(buffer);
        assert_eq!(Frame::read(&mut cursor).unwrap(), frame);
    }

    #[test]
    fn test_frame_controls() {
        for frame in [
            Frame::NoMessage,
            Frame::Deadlock,
            Frame::Waiting {
                count: 4,
                tag: Tag::new(3),
            },
            Frame::Received {
                count: 1,
                tag: Tag::ANY,
            },
        ] {
            let mut buffer = Vec::new();
            frame.write(&mut buffer).unwrap();
            let mut cursor = Cursor::new(buffer);
            assert_eq!(Frame::read(&mut cursor).unwrap(), frame);
        }
    }

    #[test]
    fn test_frame_truncated() {
        let frame = Frame::Payload {
            tag: Tag::new(1),
            data: vec![0; 32],
        };
        let mut buffer = Vec::new();
        frame.write(&mut buffer).unwrap();
        buffer.truncate(20);
        let mut cursor = Cursor::new(buffer);
        assert!(Frame::read(&mut cursor).is_err());
    }

    #[test]
    fn test_reduce_ops() {
        let mut accumulator = vec![200u8, 3, 9, 0];
        ReduceOp::Sum.apply(&[100, 1, 1, 0], &mut accumulator);
        assert_eq!(accumulator, vec![44, 4, 10, 0]);

        let mut accumulator = vec![16u8, 2];
        ReduceOp::Prod.apply(&[16, 3], &mut accumulator);
        assert_eq!(accumulator, vec![0, 6]);

        let mut accumulator = vec![5u8, 9];
        ReduceOp::Max.apply(&[7, 1], &mut accumulator);
        assert_eq!(accumulator, vec![7, 9]);

        let mut accumulator = vec![5u8, 9];
        ReduceOp::Min.apply(&[7, 1], &mut accumulator);
        assert_eq!(accumulator, vec![5, 1]);
    }

    #[test]
    fn test_reduce_tag_mapping() {
        for op in [ReduceOp::Max, ReduceOp::Min, ReduceOp::Sum, ReduceOp::Prod] {
            assert_eq!(ReduceOp::from_tag(op.tag()), Some(op));
            assert!(!op.tag().is_user());
        }
        assert_eq!(ReduceOp::from_tag(Tag::new(7)), None);
    }
}
