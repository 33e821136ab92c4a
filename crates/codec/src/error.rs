use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtpParseError {
    #[error("packet too short for an RTP header: {0} bytes")]
    Truncated(usize),
    #[error("unsupported RTP version {0}, only version 2 is accepted")]
    UnsupportedVersion(u8),
    #[error("padding bit set, not supported by this demuxer")]
    PaddingUnsupported,
    #[error("extension bit set, not supported by this demuxer")]
    ExtensionUnsupported,
    #[error("CSRC list present, not supported by this demuxer")]
    CsrcUnsupported,
    #[error("payload length {actual} is not a whole number of complex samples for {expected} samples per packet")]
    PayloadMisaligned { actual: usize, expected: usize },
}

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Encode(#[from] Box<bincode::ErrorKind>),
    #[error("archive checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
    #[error("archive sample count {actual} does not match expected {expected}")]
    SampleCountMismatch { actual: usize, expected: usize },
    #[error("unrecognized archive file name: {0}")]
    BadFileName(String),
}
