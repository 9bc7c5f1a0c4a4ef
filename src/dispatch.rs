//! Serializes requests to a [Volume] coming from async code.
//!
//! The engine under a volume can only do one thing at a time, and does
//! blocking I/O. [spawn] moves the volume onto a blocking task that handles
//! requests one by one, in the order they were sent, and hands out a
//! cloneable [VolumeClient] to send them.

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::{
    codec::Codec,
    entry::Entry,
    error::Error,
    reader::BackingReader,
    volume::{EntryHandle, Volume},
};

/// How many requests can be queued before senders wait
const QUEUE_DEPTH: usize = 32;

type Reply<T> = oneshot::Sender<Result<T, Error>>;

enum Request {
    ListEntries {
        reply: Reply<Vec<Entry>>,
    },
    OpenEntry {
        name: String,
        reply: Reply<EntryHandle>,
    },
    ReadEntry {
        handle: EntryHandle,
        offset: u64,
        length: usize,
        reply: Reply<Vec<u8>>,
    },
    CloseEntry {
        handle: EntryHandle,
        reply: Reply<()>,
    },
    Shutdown {
        reply: Reply<()>,
    },
}

/// Moves `volume` onto a blocking worker task. Must be called from within
/// a tokio runtime.
///
/// The worker stops after a shutdown request, or once every client is
/// dropped, in which case it shuts the volume down itself.
pub fn spawn<R, C>(volume: Volume<R, C>) -> VolumeClient
where
    R: BackingReader + Send + 'static,
    C: Codec + Send + 'static,
    C::Decoder: Send,
{
    let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
    tokio::task::spawn_blocking(move || serve(volume, rx));
    VolumeClient { tx }
}

fn serve<R, C>(mut volume: Volume<R, C>, mut rx: mpsc::Receiver<Request>)
where
    R: BackingReader,
    C: Codec,
{
    while let Some(req) = rx.blocking_recv() {
        match req {
            Request::ListEntries { reply } => {
                let res = volume.list_entries().map(|entries| entries.to_vec());
                let _ = reply.send(res);
            }
            Request::OpenEntry { name, reply } => {
                let _ = reply.send(volume.open_entry(&name));
            }
            Request::ReadEntry {
                handle,
                offset,
                length,
                reply,
            } => {
                trace!(%handle, offset, length, "read request");
                let res = volume.read_entry(handle, offset, length);
                let ok = res.is_ok();
                let _ = reply.send(res);
                if ok {
                    // the caller already has its bytes, get the next ones ready
                    volume.prefetch();
                }
            }
            Request::CloseEntry { handle, reply } => {
                let _ = reply.send(volume.close_entry(handle));
            }
            Request::Shutdown { reply } => {
                let _ = reply.send(volume.shutdown());
                debug!("volume worker shut down");
                return;
            }
        }
    }

    debug!("all clients gone, shutting volume down");
    if let Err(e) = volume.shutdown() {
        warn!(%e, "could not shut volume down");
    }
}

/// Sends requests to a volume worker, see [spawn].
#[derive(Clone)]
pub struct VolumeClient {
    tx: mpsc::Sender<Request>,
}

impl VolumeClient {
    async fn call<T>(&self, mk: impl FnOnce(Reply<T>) -> Request) -> Result<T, Error> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(mk(reply)).await.map_err(|_| Error::Closed)?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// See [Volume::list_entries]
    pub async fn list_entries(&self) -> Result<Vec<Entry>, Error> {
        self.call(|reply| Request::ListEntries { reply }).await
    }

    /// See [Volume::open_entry]
    pub async fn open_entry(&self, name: impl Into<String>) -> Result<EntryHandle, Error> {
        let name = name.into();
        self.call(|reply| Request::OpenEntry { name, reply }).await
    }

    /// See [Volume::read_entry]
    pub async fn read_entry(
        &self,
        handle: EntryHandle,
        offset: u64,
        length: usize,
    ) -> Result<Vec<u8>, Error> {
        self.call(|reply| Request::ReadEntry {
            handle,
            offset,
            length,
            reply,
        })
        .await
    }

    /// See [Volume::close_entry]
    pub async fn close_entry(&self, handle: EntryHandle) -> Result<(), Error> {
        self.call(|reply| Request::CloseEntry { handle, reply })
            .await
    }

    /// Shuts the volume down and stops the worker. Requests made afterwards,
    /// from any client, fail with [Error::Closed].
    pub async fn shutdown(&self) -> Result<(), Error> {
        self.call(|reply| Request::Shutdown { reply }).await
    }
}
