//! Memoria acotada de lo que el engine recuerda de flows terminados.
use std::collections::VecDeque;

/// Cola FIFO de capacidad fija; al superarla `push` devuelve las claves más
/// viejas para que el llamador las olvide.
#[derive(Debug)]
pub(crate) struct Retention<K> {
    capacity: usize,
    order: VecDeque<K>,
}

impl<K> Retention<K> {
    pub fn new(capacity: usize) -> Self {
        Self { capacity,
               order: VecDeque::new() }
    }

    pub fn push(&mut self, key: K) -> Vec<K> {
        self.order.push_back(key);
        let excess = self.order.len().saturating_sub(self.capacity);
        self.order.drain(..excess).collect()
    }

    pub fn clear(&mut self) {
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let mut r = Retention::new(2);
        assert!(r.push(1).is_empty());
        assert!(r.push(2).is_empty());
        assert_eq!(r.push(3), vec![1]);
        assert_eq!(r.push(4), vec![2]);
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut r = Retention::new(0);
        assert_eq!(r.push("a"), vec!["a"]);
    }
}
