/// A slot of the pool, linked to its neighbours in recency order.
#[derive(Clone, Copy, Debug, Default)]
struct PoolNode {
    prev: Option<u32>,
    next: Option<u32>,
}

/// Fixed capacity LRU registry over the tile slots of a virtual texture atlas.
///
/// The slots form a doubly linked list ordered by the recency of their activation.
/// The head is the least recently activated slot and the next one to be reassigned,
/// the tail is the most recently activated one.
/// Slots are never removed, reassigning a slot only changes the page it belongs to.
#[derive(Clone, Debug)]
pub struct TileTexturePool {
    nodes: Vec<PoolNode>,
    head: u32,
    tail: u32,
}

impl TileTexturePool {
    /// Creates a pool of `count` slots (at least one), initially ordered by id.
    pub fn new(count: u32) -> Self {
        let count = count.max(1);

        let nodes = (0..count)
            .map(|id| PoolNode {
                prev: id.checked_sub(1),
                next: (id + 1 < count).then_some(id + 1),
            })
            .collect();

        Self {
            nodes,
            head: 0,
            tail: count - 1,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The least recently activated slot.
    #[inline]
    pub fn first(&self) -> u32 {
        self.head
    }

    /// The most recently activated slot.
    #[inline]
    pub fn last(&self) -> u32 {
        self.tail
    }

    /// Marks the slot as most recently used.
    ///
    /// Returns `false` for ids outside of the pool.
    pub fn set_active(&mut self, id: u32) -> bool {
        if id as usize >= self.nodes.len() {
            return false;
        }

        if id == self.tail {
            return true;
        }

        self.unlink(id);
        self.push_back(id);

        true
    }

    /// Iterates the slots from the least to the most recently activated one.
    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::successors(Some(self.head), |&id| self.nodes[id as usize].next)
    }

    fn unlink(&mut self, id: u32) {
        let PoolNode { prev, next } = self.nodes[id as usize];

        match prev {
            Some(prev) => self.nodes[prev as usize].next = next,
            None => {
                if let Some(next) = next {
                    self.head = next;
                }
            }
        }

        match next {
            Some(next) => self.nodes[next as usize].prev = prev,
            None => {
                if let Some(prev) = prev {
                    self.tail = prev;
                }
            }
        }

        self.nodes[id as usize] = PoolNode::default();
    }

    fn push_back(&mut self, id: u32) {
        let tail = self.tail;

        self.nodes[tail as usize].next = Some(id);
        self.nodes[id as usize].prev = Some(tail);
        self.tail = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;
    use rand::Rng;

    #[test]
    fn initial_order_is_by_id() {
        let pool = TileTexturePool::new(4);

        assert_eq!(pool.first(), 0);
        assert_eq!(pool.last(), 3);
        assert_eq!(pool.iter().collect_vec(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn activation_moves_to_the_tail() {
        let mut pool = TileTexturePool::new(4);

        assert!(pool.set_active(0));
        assert_eq!(pool.first(), 1);
        assert_eq!(pool.iter().collect_vec(), vec![1, 2, 3, 0]);

        assert!(pool.set_active(2));
        assert_eq!(pool.iter().collect_vec(), vec![1, 3, 0, 2]);
    }

    #[test]
    fn activating_the_tail_keeps_the_order() {
        let mut pool = TileTexturePool::new(3);

        assert!(pool.set_active(2));
        assert_eq!(pool.iter().collect_vec(), vec![0, 1, 2]);
    }

    #[test]
    fn activating_every_slot_in_order_restores_the_order() {
        let count = 16;
        let mut pool = TileTexturePool::new(count);

        for id in 0..count {
            assert_eq!(pool.first(), id);
            pool.set_active(id);
        }

        assert_eq!(pool.iter().collect_vec(), (0..count).collect_vec());
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        let mut pool = TileTexturePool::new(2);

        assert!(!pool.set_active(2));
        assert_eq!(pool.iter().collect_vec(), vec![0, 1]);
    }

    #[test]
    fn single_slot_pool() {
        let mut pool = TileTexturePool::new(0);

        assert_eq!(pool.len(), 1);
        assert!(pool.set_active(0));
        assert_eq!(pool.first(), 0);
    }

    #[test]
    fn random_activations_match_a_reference_order() {
        let count = 32;
        let mut rng = rand::rng();
        let mut pool = TileTexturePool::new(count);
        let mut reference = (0..count).collect_vec();

        for _ in 0..1000 {
            let id = rng.random_range(0..count);

            pool.set_active(id);

            reference.retain(|&other| other != id);
            reference.push(id);

            assert_eq!(pool.first(), reference[0]);
            assert_eq!(pool.last(), id);
        }

        assert_eq!(pool.iter().collect_vec(), reference);
    }
}
