use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use walklink_core::geo::distance_km;
use walklink_core::GeoPoint;

#[derive(Debug, Clone, Copy)]
struct Mark {
    at: Instant,
    point: GeoPoint,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// The caller owns this window's durable write.
    Admitted { moved_km: Option<f64> },
    Throttled,
}

impl Admission {
    #[cfg(test)]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Per-walker write throttle. The window is reserved under the lock, so
/// concurrent samples inside one window admit exactly one writer.
pub struct LocationThrottle {
    window: Duration,
    marks: Mutex<HashMap<String, Mark>>,
}

impl LocationThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            marks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn try_admit(&self, walker_id: &str, point: GeoPoint) -> Admission {
        let now = Instant::now();
        let mut marks = self.marks.lock().await;
        let moved_km = match marks.get(walker_id) {
            Some(mark) if now.duration_since(mark.at) < self.window => {
                return Admission::Throttled;
            }
            Some(mark) => Some(distance_km(mark.point, point)),
            None => None,
        };
        marks.insert(walker_id.to_string(), Mark { at: now, point });
        Admission::Admitted { moved_km }
    }

    /// Drops the walker's mark once their walk has ended.
    pub async fn forget(&self, walker_id: &str) {
        self.marks.lock().await.remove(walker_id);
    }
}
