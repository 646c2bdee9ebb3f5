//! Rewindable wrapper over a non-seekable remote download.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use drift_store::{ObjectDownload, ObjectReader, ObjectStore, StoreError};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tracing::debug;

type OpenFuture = Pin<Box<dyn Future<Output = Result<ObjectDownload, StoreError>> + Send>>;

enum State {
    /// Streaming from an open download.
    Reading(ObjectReader),
    /// Reopening the download.
    Opening(OpenFuture),
    /// Rewound; the download is reopened on the next read.
    Rewound,
}

/// A download of `bucket/name` that an uploader can restart from byte zero.
///
/// Only two seeks are supported:
///
/// - `SeekFrom::Start(0)` closes the current download; the next read reopens
///   it from the store. A rewind before any byte was read keeps the open
///   download.
/// - `SeekFrom::End(0)` reports the object size without touching the stream.
///
/// Every other seek fails with [`io::ErrorKind::Unsupported`].
pub struct RetryableStream {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    name: String,
    size: u64,
    position: u64,
    state: State,
    seek_result: Option<u64>,
    reopens: u32,
}

impl RetryableStream {
    /// Wrap an already open download of `bucket/name`.
    pub fn new(
        store: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
        name: impl Into<String>,
        download: ObjectDownload,
    ) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            name: name.into(),
            size: download.size,
            position: 0,
            state: State::Reading(download.reader),
            seek_result: None,
            reopens: 0,
        }
    }

    /// Open `bucket/name` and wrap the download.
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        bucket: &str,
        name: &str,
    ) -> Result<Self, StoreError> {
        let download = store.get_object(bucket, name).await?;
        Ok(Self::new(store, bucket, name, download))
    }

    /// Total object size.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// How many times the download was reopened.
    pub fn reopens(&self) -> u32 {
        self.reopens
    }

    fn reopen(&self) -> OpenFuture {
        let store = self.store.clone();
        let bucket = self.bucket.clone();
        let name = self.name.clone();
        Box::pin(async move { store.get_object(&bucket, &name).await })
    }
}

impl AsyncRead for RetryableStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                State::Reading(reader) => {
                    let before = buf.filled().len();
                    ready!(reader.as_mut().poll_read(cx, buf))?;
                    this.position += (buf.filled().len() - before) as u64;
                    return Poll::Ready(Ok(()));
                }
                State::Opening(open) => {
                    let download = ready!(open.as_mut().poll(cx)).map_err(|e| {
                        io::Error::other(format!("reopening {}/{}: {e}", this.bucket, this.name))
                    });
                    let download = match download {
                        Ok(download) => download,
                        Err(e) => {
                            this.state = State::Rewound;
                            return Poll::Ready(Err(e));
                        }
                    };
                    if download.size != this.size {
                        this.state = State::Rewound;
                        return Poll::Ready(Err(io::Error::other(format!(
                            "object size changed from {} to {}",
                            this.size, download.size
                        ))));
                    }
                    this.reopens += 1;
                    this.position = 0;
                    this.state = State::Reading(download.reader);
                }
                State::Rewound => {
                    debug!(bucket = %this.bucket, name = %this.name, "reopening download");
                    this.state = State::Opening(this.reopen());
                }
            }
        }
    }
}

impl AsyncSeek for RetryableStream {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        match position {
            SeekFrom::Start(0) => {
                let untouched = this.position == 0 && matches!(this.state, State::Reading(_));
                if !untouched {
                    this.state = State::Rewound;
                    this.position = 0;
                }
                this.seek_result = Some(0);
                Ok(())
            }
            SeekFrom::End(0) => {
                this.seek_result = Some(this.size);
                Ok(())
            }
            other => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported seek {other:?}"),
            )),
        }
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        let this = self.get_mut();
        Poll::Ready(Ok(this.seek_result.take().unwrap_or(this.position)))
    }
}
