//! Bounded history buffers used for smoothing and chart windows.

use std::collections::VecDeque;

pub fn push_capped<T>(dq: &mut VecDeque<T>, v: T, cap: usize) {
    if cap == 0 {
        return;
    }
    while dq.len() >= cap {
        dq.pop_front();
    }
    dq.push_back(v);
}

/// Fixed-capacity FIFO window; the oldest entry is evicted on overflow.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    items: VecDeque<T>,
    cap: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            items: VecDeque::with_capacity(cap),
            cap,
        }
    }

    pub fn push(&mut self, v: T) {
        push_capped(&mut self.items, v, self.cap);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

impl<T: Clone> RollingWindow<T> {
    /// Oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

impl RollingWindow<f64> {
    pub fn mean(&self) -> Option<f64> {
        if self.items.is_empty() {
            return None;
        }
        Some(self.items.iter().sum::<f64>() / self.items.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_first() {
        let mut w = RollingWindow::new(3);
        for v in 1..=5 {
            w.push(v);
        }
        assert_eq!(w.len(), 3);
        assert_eq!(w.to_vec(), vec![3, 4, 5]);
    }

    #[test]
    fn mean_of_window() {
        let mut w = RollingWindow::new(2);
        assert_eq!(w.mean(), None);
        w.push(10.0);
        w.push(30.0);
        assert_eq!(w.mean(), Some(20.0));
        w.push(50.0);
        assert_eq!(w.mean(), Some(40.0));
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut w = RollingWindow::new(0);
        w.push("a");
        w.push("b");
        assert_eq!(w.capacity(), 1);
        assert_eq!(w.to_vec(), vec!["b"]);
    }
}
