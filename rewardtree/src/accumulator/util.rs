//! Small helpers shared by the accumulator and its tests.
use super::node_hash::NodeHash;

/// Number of leaves a tree must hold to fit `size` leaves: the next power of two, or zero
/// for an empty set. `None` when that power of two does not fit in a `usize`.
pub fn padded_size(size: usize) -> Option<usize> {
    if size == 0 {
        return Some(0);
    }
    size.checked_next_power_of_two()
}

/// Number of levels (leaf level included) of a tree built over `leaves` leaves.
pub fn tree_height(leaves: usize) -> usize {
    if leaves == 0 {
        return 0;
    }
    let mut level_len = leaves;
    let mut height = 1;
    while level_len > 1 {
        level_len = level_len.div_ceil(2);
        height += 1;
    }
    height
}

/// Hash of a single byte. Handy for building deterministic test vectors.
pub fn hash_from_u8(value: u8) -> NodeHash {
    NodeHash::hashv(&[&[value]])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_padded_size() {
        assert_eq!(padded_size(0), Some(0));
        assert_eq!(padded_size(1), Some(1));
        assert_eq!(padded_size(3), Some(4));
        assert_eq!(padded_size(32), Some(32));
        assert_eq!(padded_size(33), Some(64));
        assert_eq!(padded_size(132), Some(256));
        assert_eq!(padded_size(1 << (usize::BITS - 1)), Some(1 << (usize::BITS - 1)));
        assert_eq!(padded_size((1 << (usize::BITS - 1)) + 1), None);
        assert_eq!(padded_size(usize::MAX), None);
    }

    #[test]
    fn test_tree_height() {
        assert_eq!(tree_height(0), 0);
        assert_eq!(tree_height(1), 1);
        assert_eq!(tree_height(2), 2);
        assert_eq!(tree_height(3), 3);
        assert_eq!(tree_height(32), 6);
    }
}
