use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Ventana deslizante por cliente.
pub struct RateLimiter {
    max: usize,
    window: Duration,
    hits: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn max(&self) -> usize {
        self.max
    }

    pub fn allow(&self, key: &str) -> bool {
        self.allow_at(key, Instant::now())
    }

    /// Un request rechazado no se cuenta.
    pub fn allow_at(&self, key: &str, now: Instant) -> bool {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let q = hits.entry(key.to_string()).or_default();

        prune(q, now, self.window);
        if q.len() >= self.max {
            return false;
        }
        q.push_back(now);
        true
    }

    /// Saca los clientes sin requests dentro de la ventana. Devuelve cuántos.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let before = hits.len();
        hits.retain(|_, q| {
            prune(q, now, self.window);
            !q.is_empty()
        });
        before - hits.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn prune(q: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(&t) = q.front() {
        if now.saturating_duration_since(t) >= window {
            q.pop_front();
        } else {
            break;
        }
    }
}
