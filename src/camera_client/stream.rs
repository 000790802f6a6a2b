//! MJPEG stream reader

use crate::error::Result;
use crate::frame_demuxer::FrameDemuxer;
use futures::Stream;
use std::collections::VecDeque;

/// Live `GET /camera/stream` body cut into JPEG frames
pub struct MjpegStream {
    response: reqwest::Response,
    demuxer: FrameDemuxer,
    ready: VecDeque<Vec<u8>>,
    finished: bool,
}

impl MjpegStream {
    pub(crate) fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            demuxer: FrameDemuxer::new(),
            ready: VecDeque::new(),
            finished: false,
        }
    }

    /// Next complete frame; `Ok(None)` once the service closes the stream
    pub async fn next_frame(&mut self) -> Result<Option<Vec<u8>>> {
        loop {
            if let Some(frame) = self.ready.pop_front() {
                return Ok(Some(frame));
            }
            if self.finished {
                return Ok(None);
            }

            match self.response.chunk().await? {
                Some(chunk) => {
                    self.ready.extend(self.demuxer.feed(&chunk));
                }
                None => {
                    self.demuxer.finish();
                    self.finished = true;
                    tracing::debug!(
                        frames = self.demuxer.frames_emitted(),
                        "MJPEG stream closed by remote"
                    );
                }
            }
        }
    }

    /// Frames extracted so far
    pub fn frames_emitted(&self) -> u64 {
        self.demuxer.frames_emitted()
    }

    /// Adapt into a `futures::Stream` of frames
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<u8>>> {
        futures::stream::unfold(self, |mut stream| async move {
            match stream.next_frame().await {
                Ok(Some(frame)) => Some((Ok(frame), stream)),
                Ok(None) => None,
                Err(e) => {
                    stream.finished = true;
                    stream.ready.clear();
                    Some((Err(e), stream))
                }
            }
        })
    }
}
