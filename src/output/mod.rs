mod loopback;

pub use loopback::{device_path, V4L2Output};

use std::io;

use crate::error::PipelineError;

/// Trait for output destinations
pub trait FrameSink {
    /// Write part of a packed frame, returning how many bytes were accepted
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Get the expected output resolution
    fn resolution(&self) -> (u32, u32);

    /// Name used in error messages
    fn name(&self) -> &str;
}

/// Push a whole packed frame into `sink`, continuing after partial writes.
///
/// A write that accepts nothing or fails is fatal: a half-written frame
/// would shear the stream.
pub fn write_frame<S: FrameSink + ?Sized>(sink: &mut S, bytes: &[u8]) -> Result<(), PipelineError> {
    let mut remaining = bytes;
    while !remaining.is_empty() {
        match sink.write(remaining) {
            Ok(0) => {
                return Err(PipelineError::StalledWrite {
                    device: sink.name().to_string(),
                    remaining: remaining.len(),
                })
            }
            Ok(written) => remaining = &remaining[written.min(remaining.len())..],
            Err(source) => {
                return Err(PipelineError::FatalIo {
                    device: sink.name().to_string(),
                    source,
                })
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `chunk` bytes per call, then fails after `budget` calls.
    struct ChunkedSink {
        chunk: usize,
        budget: usize,
        received: Vec<u8>,
        failure: Option<io::ErrorKind>,
    }

    impl FrameSink for ChunkedSink {
        fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return match self.failure {
                    Some(kind) => Err(io::Error::from(kind)),
                    None => Ok(0),
                };
            }
            self.budget -= 1;
            let n = bytes.len().min(self.chunk);
            self.received.extend_from_slice(&bytes[..n]);
            Ok(n)
        }

        fn resolution(&self) -> (u32, u32) {
            (2, 2)
        }

        fn name(&self) -> &str {
            "test sink"
        }
    }

    fn sink(chunk: usize, budget: usize, failure: Option<io::ErrorKind>) -> ChunkedSink {
        ChunkedSink {
            chunk,
            budget,
            received: Vec::new(),
            failure,
        }
    }

    #[test]
    fn partial_writes_are_completed() {
        let mut out = sink(3, usize::MAX, None);
        let frame: Vec<u8> = (0..10).collect();
        write_frame(&mut out, &frame).unwrap();
        assert_eq!(out.received, frame);
    }

    #[test]
    fn zero_write_is_fatal() {
        let mut out = sink(4, 2, None);
        let err = write_frame(&mut out, &[0; 10]).unwrap_err();
        match err {
            PipelineError::StalledWrite { remaining, .. } => assert_eq!(remaining, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn write_error_is_fatal() {
        let mut out = sink(4, 0, Some(io::ErrorKind::BrokenPipe));
        let err = write_frame(&mut out, &[0; 4]).unwrap_err();
        assert!(matches!(err, PipelineError::FatalIo { .. }));
    }
}
