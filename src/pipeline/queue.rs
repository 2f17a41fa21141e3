//! Bounded multi-producer multi-consumer queue between pipeline stages.
//!
//! Producers hold [`QueueSender`] clones, consumers hold [`QueueReceiver`] clones that
//! share one receiving end.  When every sender has called
//! [`QueueSender::set_submission_finished`] (or was dropped), consumers drain the queue
//! and then get `None`.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::{mpsc, Mutex};

/// Errors when using a queue.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("queue {0} is closed")]
    Closed(String),
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicUsize,
    consumed: AtomicUsize,
}

/// Sending side of a queue.
#[derive(Debug)]
pub struct QueueSender<T> {
    name: Arc<str>,
    tx: mpsc::Sender<T>,
    counters: Arc<Counters>,
}

impl<T> Clone for QueueSender<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            tx: self.tx.clone(),
            counters: self.counters.clone(),
        }
    }
}

/// Receiving side of a queue.
#[derive(Debug)]
pub struct QueueReceiver<T> {
    name: Arc<str>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
    counters: Arc<Counters>,
}

impl<T> Clone for QueueReceiver<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            rx: self.rx.clone(),
            counters: self.counters.clone(),
        }
    }
}

/// Create a queue holding at most `max_size` items.
pub fn bounded<T>(name: &str, max_size: usize) -> (QueueSender<T>, QueueReceiver<T>) {
    let (tx, rx) = mpsc::channel(max_size.max(1));
    let name: Arc<str> = Arc::from(name);
    let counters = Arc::new(Counters::default());
    (
        QueueSender {
            name: name.clone(),
            tx,
            counters: counters.clone(),
        },
        QueueReceiver {
            name,
            rx: Arc::new(Mutex::new(rx)),
            counters,
        },
    )
}

impl<T> QueueSender<T> {
    /// Put an item, waiting while the queue is full.
    pub async fn put(&self, item: T) -> Result<(), Error> {
        self.tx
            .send(item)
            .await
            .map_err(|_| Error::Closed(self.name.to_string()))?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Signal that this producer will not submit any more items.
    pub fn set_submission_finished(self) {
        tracing::debug!("producer finished submitting to queue {}", &self.name);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of items waiting in the queue.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

impl<T> QueueReceiver<T> {
    /// Next item, or `None` once submission is finished and the queue is drained.
    pub async fn get(&self) -> Option<T> {
        let item = self.rx.lock().await.recv().await;
        if item.is_some() {
            self.counters.consumed.fetch_add(1, Ordering::Relaxed);
        }
        item
    }

    /// Up to `batch_size` items; empty once submission is finished and the queue is drained.
    ///
    /// Waits for the first item only, then takes what is immediately available.
    pub async fn get_batch(&self, batch_size: usize) -> Vec<T> {
        let mut rx = self.rx.lock().await;
        let mut batch = Vec::new();
        if let Some(item) = rx.recv().await {
            batch.push(item);
            while batch.len() < batch_size {
                match rx.try_recv() {
                    Ok(item) => batch.push(item),
                    Err(_) => break,
                }
            }
        }
        self.counters
            .consumed
            .fetch_add(batch.len(), Ordering::Relaxed);
        batch
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of items submitted so far.
    pub fn submitted(&self) -> usize {
        self.counters.submitted.load(Ordering::Relaxed)
    }

    /// Number of items consumed so far.
    pub fn consumed(&self) -> usize {
        self.counters.consumed.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[tokio::test]
    async fn fifo_and_finish() -> Result<(), anyhow::Error> {
        let (tx, rx) = bounded::<usize>("test", 10);
        for i in 0..3 {
            tx.put(i).await?;
        }
        assert_eq!(tx.pending(), 3);
        tx.set_submission_finished();

        assert_eq!(rx.get().await, Some(0));
        assert_eq!(rx.get().await, Some(1));
        assert_eq!(rx.get().await, Some(2));
        assert_eq!(rx.get().await, None);
        assert_eq!(rx.submitted(), 3);
        assert_eq!(rx.consumed(), 3);
        Ok(())
    }

    #[tokio::test]
    async fn finished_only_after_all_producers() -> Result<(), anyhow::Error> {
        let (tx, rx) = bounded::<&str>("test", 10);
        let tx2 = tx.clone();
        tx.put("a").await?;
        tx.set_submission_finished();
        tx2.put("b").await?;

        assert_eq!(rx.get().await, Some("a"));
        assert_eq!(rx.get().await, Some("b"));

        tx2.set_submission_finished();
        assert_eq!(rx.get().await, None);
        Ok(())
    }

    #[tokio::test]
    async fn backpressure() -> Result<(), anyhow::Error> {
        let (tx, rx) = bounded::<usize>("test", 2);
        tx.put(1).await?;
        tx.put(2).await?;

        let blocked = tokio::time::timeout(std::time::Duration::from_millis(50), tx.put(3)).await;
        assert!(blocked.is_err(), "put on full queue must wait");

        assert_eq!(rx.get().await, Some(1));
        tx.put(3).await?;
        Ok(())
    }

    #[tokio::test]
    async fn batches() -> Result<(), anyhow::Error> {
        let (tx, rx) = bounded::<usize>("test", 10);
        for i in 0..5 {
            tx.put(i).await?;
        }
        tx.set_submission_finished();

        assert_eq!(rx.get_batch(3).await, vec![0, 1, 2]);
        assert_eq!(rx.get_batch(3).await, vec![3, 4]);
        assert_eq!(rx.get_batch(3).await, Vec::<usize>::new());
        Ok(())
    }

    #[tokio::test]
    async fn put_to_closed_queue() {
        let (tx, rx) = bounded::<usize>("closed", 1);
        drop(rx);
        assert_eq!(tx.put(1).await, Err(Error::Closed("closed".into())));
    }

    #[tokio::test]
    async fn many_consumers() -> Result<(), anyhow::Error> {
        let (tx, rx) = bounded::<usize>("test", 4);
        let consumers = (0..4)
            .map(|_| {
                let rx = rx.clone();
                tokio::spawn(async move {
                    let mut sum = 0;
                    while let Some(i) = rx.get().await {
                        sum += i;
                    }
                    sum
                })
            })
            .collect::<Vec<_>>();

        for i in 1..=100 {
            tx.put(i).await?;
        }
        tx.set_submission_finished();

        let mut total = 0;
        for consumer in consumers {
            total += consumer.await?;
        }
        assert_eq!(total, 5050);
        Ok(())
    }
}
