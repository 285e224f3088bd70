use super::event::Event;
use crate::API_BACKOFF_MAX_SECS;
use crate::API_BACKOFF_MIN_SECS;
use crate::API_QUEUE_MAX;
use crate::API_SHUTDOWN_BACKOFF_SECS;
use crate::API_SHUTDOWN_RETRIES;
use crate::API_TIMEOUT_SECS;
use crate::Millis;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;
use std::time::Instant;

enum Item {
    Event(Event),
    Shutdown,
}

struct Shared {
    queue: Mutex<VecDeque<Item>>,
    cv: Condvar,
}

/// Debounced delivery of progress events to the HTTP sink.
///
/// Producers enqueue into a bounded FIFO; one background thread collects
/// batches once the debounce interval has elapsed since the last
/// successful send and POSTs them with retry and additive backoff. The
/// reporter is advisory: a full queue drops events with a warning and a
/// failed shutdown flush gives up after a few retries.
pub struct Reporter {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
    url: String,
    key: String,
}

impl Reporter {
    pub fn start(url: &str, key: &str, debounce_ms: Millis) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            cv: Condvar::new(),
        });
        let worker = Worker {
            shared: Arc::clone(&shared),
            url: url.to_string(),
            key: key.to_string(),
            debounce: Duration::from_millis(debounce_ms.max(0) as u64),
        };
        let handle = std::thread::spawn(move || worker.run());
        Self {
            shared,
            handle: Mutex::new(Some(handle)),
            url: url.to_string(),
            key: key.to_string(),
        }
    }

    pub fn enqueue(&self, event: Event) {
        let mut queue = self.shared.queue.lock().expect("reporter lock");
        if queue.len() >= API_QUEUE_MAX {
            log::warn!("API queue full, dropping event");
            return;
        }
        queue.push_back(Item::Event(event));
        self.shared.cv.notify_one();
    }

    /// Synchronous `DELETE /api/reset`, issued at startup under --cleanup.
    pub fn reset(&self) {
        log::info!("Resetting API database...");
        let client = match blocking_client() {
            Some(client) => client,
            None => return,
        };
        let outcome = client
            .delete(format!("{}/api/reset", self.url))
            .header("X-API-KEY", &self.key)
            .send();
        match outcome {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => log::error!("API Reset failed: HTTP {}", resp.status().as_u16()),
            Err(e) => log::error!("API Reset failed: {e}"),
        }
    }

    /// Enqueue the shutdown marker and wait for the flush to finish.
    pub fn stop(&self) {
        {
            let mut queue = self.shared.queue.lock().expect("reporter lock");
            queue.push_back(Item::Shutdown);
            self.shared.cv.notify_one();
        }
        let handle = self.handle.lock().expect("reporter join lock").take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Worker {
    shared: Arc<Shared>,
    url: String,
    key: String,
    debounce: Duration,
}

impl Worker {
    fn run(self) {
        let Some(client) = blocking_client() else {
            return;
        };
        let mut last_send = Instant::now();
        let mut backoff = API_BACKOFF_MIN_SECS;
        let mut shutdown_retries = 0;
        let mut in_shutdown = false;

        loop {
            let (batch, shutdown) = self.collect(last_send, in_shutdown);
            if shutdown && !in_shutdown {
                in_shutdown = true;
                shutdown_retries = API_SHUTDOWN_RETRIES;
            }

            if batch.is_empty() {
                if in_shutdown {
                    break;
                }
                continue;
            }

            if self.send(&client, &batch, in_shutdown) {
                backoff = API_BACKOFF_MIN_SECS;
                last_send = Instant::now();
                continue;
            }

            {
                let mut queue = self.shared.queue.lock().expect("reporter lock");
                for event in batch.into_iter().rev() {
                    queue.push_front(Item::Event(event));
                }
            }

            if !in_shutdown {
                std::thread::sleep(Duration::from_secs(backoff));
                backoff = (backoff + 2).min(API_BACKOFF_MAX_SECS);
                continue;
            }

            shutdown_retries -= 1;
            if shutdown_retries == 0 {
                break;
            }
            std::thread::sleep(Duration::from_secs(API_SHUTDOWN_BACKOFF_SECS));
        }
    }

    /// Wait until the debounce interval has elapsed since the last send, a
    /// shutdown marker reaches the head, or the queue hits its cap; then
    /// drain everything ahead of the marker. An empty queue blocks on the
    /// condvar regardless of the deadline.
    fn collect(&self, last_send: Instant, in_shutdown: bool) -> (Vec<Event>, bool) {
        let mut queue = self.shared.queue.lock().expect("reporter lock");
        if !in_shutdown {
            let deadline = last_send + self.debounce;
            loop {
                if queue.len() >= API_QUEUE_MAX {
                    break;
                }
                match queue.front() {
                    Some(Item::Shutdown) => break,
                    Some(Item::Event(_)) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        let (guard, _) = self
                            .shared
                            .cv
                            .wait_timeout(queue, deadline - now)
                            .expect("reporter lock");
                        queue = guard;
                    }
                    None => {
                        queue = self.shared.cv.wait(queue).expect("reporter lock");
                    }
                }
            }
        }
        let mut batch = Vec::new();
        let mut shutdown = false;
        loop {
            match queue.front() {
                Some(Item::Shutdown) => {
                    shutdown = true;
                    break;
                }
                Some(Item::Event(_)) => {
                    if let Some(Item::Event(event)) = queue.pop_front() {
                        batch.push(event);
                    }
                }
                None => break,
            }
        }
        (batch, shutdown)
    }

    fn send(&self, client: &reqwest::blocking::Client, batch: &[Event], in_shutdown: bool) -> bool {
        let outcome = client
            .post(format!("{}/api/batch", self.url))
            .header("Content-Type", "application/json")
            .header("X-API-KEY", &self.key)
            .json(batch)
            .send();
        let failure = match outcome {
            Ok(resp) if resp.status().as_u16() < 400 => return true,
            Ok(resp) => format!("HTTP {}", resp.status().as_u16()),
            Err(e) => e.to_string(),
        };
        if in_shutdown {
            log::warn!("API Request failed: {failure}");
        } else {
            log::error!("API Request failed: {failure}");
        }
        false
    }
}

fn blocking_client() -> Option<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(API_TIMEOUT_SECS))
        .build()
        .map_err(|e| log::error!("cannot build HTTP client: {e}"))
        .ok()
}
