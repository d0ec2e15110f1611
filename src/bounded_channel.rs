// SPDX-License-Identifier: Apache-2.0

//! Bounded MPMC channel usable from both async tasks and blocking threads.
//!
//! The poller feeds read tasks in from async code while workers, running on the
//! blocking pool, pull them out; entries travel the other way to consumers.
//! A full channel blocks the sender, which is how backpressure propagates.

use flume::{Receiver, Sender};
use std::fmt;
use std::time::Duration;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

impl<T> BoundedSender<T> {
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected) // receiver closed
    }

    /// Blocking send - blocks until there is capacity in the channel.
    /// Use this from non-async contexts (e.g., blocking worker threads).
    pub fn send_blocking(&self, item: T) -> Result<(), SendError> {
        self.tx.send(item).map_err(|_| SendError::Disconnected)
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> Clone for BoundedReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
        }
    }
}

impl<T> BoundedReceiver<T> {
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok() // None once disconnected
    }

    /// Blocking receive - blocks until an item is available.
    /// Returns None once every sender is dropped and the channel is drained.
    pub fn recv_blocking(&self) -> Option<T> {
        self.rx.recv().ok()
    }

    /// Non-blocking receive - returns immediately.
    /// Returns None if no item is available or channel is disconnected.
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Blocking receive with timeout.
    /// Returns None if timeout expires or channel is disconnected.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Take everything currently queued without blocking
    pub fn drain(&self) -> Vec<T> {
        self.rx.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{SendError, bounded};
    use std::time::Duration;
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn sender_blocks_on_full() {
        let (tx, mut rx) = bounded(1);

        let mut send1 = spawn(async { tx.send(1).await });
        assert_ok!(assert_ready!(send1.poll()));
        drop(send1);

        // Queue is full, the second send waits for the consumer
        let mut send2 = spawn(async { tx.send(2).await });
        assert_pending!(send2.poll());

        let mut recv1 = spawn(async { rx.next().await });
        assert_eq!(Some(1), assert_ready!(recv1.poll()));
        drop(recv1);

        assert!(send2.is_woken());
        assert_ok!(assert_ready!(send2.poll()));
    }

    #[tokio::test]
    async fn sender_fails_on_rx_close() {
        let (tx, rx) = bounded(1);
        drop(rx);

        let mut send1 = spawn(async { tx.send(10).await });
        assert_eq!(Err(SendError::Disconnected), assert_ready!(send1.poll()));
        assert_eq!(Err(SendError::Disconnected), tx.send_blocking(11));
    }

    #[test]
    fn workers_drain_queue_until_senders_drop() {
        let (tx, rx) = bounded(4);

        let workers: Vec<_> = (0..3)
            .map(|_| {
                let rx = rx.clone();
                std::thread::spawn(move || {
                    let mut taken = Vec::new();
                    while let Some(item) = rx.recv_blocking() {
                        taken.push(item);
                    }
                    taken
                })
            })
            .collect();

        for i in 0..20 {
            tx.send_blocking(i).unwrap();
        }
        drop(tx);

        let mut all: Vec<i32> = workers
            .into_iter()
            .flat_map(|w| w.join().unwrap())
            .collect();
        all.sort();
        assert_eq!(all, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn try_recv_and_drain() {
        let (tx, rx) = bounded(4);
        assert_eq!(rx.try_recv(), None::<u8>);
        assert_eq!(rx.recv_timeout(Duration::from_millis(5)), None);

        tx.send_blocking(1).unwrap();
        tx.send_blocking(2).unwrap();
        tx.send_blocking(3).unwrap();
        assert_eq!(rx.len(), 3);
        assert_eq!(rx.try_recv(), Some(1));
        assert_eq!(rx.drain(), vec![2, 3]);
        assert!(rx.is_empty());
    }
}
