//! Binary heap algorithms with fixed tie-break behavior.
//!
//! The functions operate on any container implementing [`Heap`]. The order is a min-heap under
//! [`Heap::less`]. Unlike a textbook heap, [`down()`] keeps moving a node toward the leaves when it
//! ties with its smaller child, and only swaps with a lone left child on a tie. Search results
//! depend on these exact moves, so the algorithms must not be replaced by `BinaryHeap` or
//! `sort_by`.

/// Container that the heap algorithms rearrange in place.
pub trait Heap {
    /// Element type.
    type Item;

    /// Number of stored elements.
    fn len(&self) -> usize;

    /// Returns `true` if the heap holds no elements.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Strict ordering between the elements at `i` and `j`.
    fn less(&self, i: usize, j: usize) -> bool;

    /// Exchanges the elements at `i` and `j`.
    fn swap(&mut self, i: usize, j: usize);

    /// Appends an element to the end of the underlying storage.
    fn push_item(&mut self, x: Self::Item);

    /// Removes the last element of the underlying storage.
    fn pop_item(&mut self) -> Option<Self::Item>;
}

/// Establishes the heap order over the whole container.
pub fn init<H: Heap + ?Sized>(h: &mut H) {
    let n = h.len();
    for i in (0..n / 2).rev() {
        down(h, i, n);
    }
}

/// Inserts an element.
pub fn push<H: Heap + ?Sized>(h: &mut H, x: H::Item) {
    h.push_item(x);
    up(h, h.len() - 1);
}

/// Removes and returns the root.
pub fn pop<H: Heap + ?Sized>(h: &mut H) -> Option<H::Item> {
    if h.is_empty() {
        return None;
    }
    let n = h.len() - 1;
    h.swap(0, n);
    down(h, 0, n);
    h.pop_item()
}

/// Removes and returns the element at `i`.
pub fn remove<H: Heap + ?Sized>(h: &mut H, i: usize) -> Option<H::Item> {
    if i >= h.len() {
        return None;
    }
    let n = h.len() - 1;
    if n != i {
        h.swap(i, n);
        down(h, i, n);
        up(h, i);
    }
    h.pop_item()
}

fn up<H: Heap + ?Sized>(h: &mut H, mut j: usize) {
    while j > 0 {
        let i = (j - 1) / 2;
        if !h.less(j, i) {
            break;
        }
        h.swap(i, j);
        j = i;
    }
}

/// Moves the element at `i` toward the leaves, considering only the first `n` elements.
pub fn down<H: Heap + ?Sized>(h: &mut H, mut i: usize, n: usize) {
    loop {
        let right = 2 * (i + 1);
        if right >= n {
            if right == n {
                let left = right - 1;
                if h.less(i, left) == h.less(left, i) {
                    h.swap(i, left);
                }
            }
            break;
        }
        let left = right - 1;
        let j = if h.less(left, right) { left } else { right };
        if h.less(i, j) && !h.less(j, i) {
            break;
        }
        h.swap(i, j);
        i = j;
    }
}

/// Textbook sift-down: stops on ties and prefers the right child only when strictly smaller.
pub fn regular_down<H: Heap + ?Sized>(h: &mut H, mut i: usize, n: usize) {
    loop {
        let left = 2 * i + 1;
        if left >= n {
            break;
        }
        let mut j = left;
        let right = left + 1;
        if right < n && !h.less(left, right) {
            j = right;
        }
        if !h.less(j, i) {
            break;
        }
        h.swap(i, j);
        i = j;
    }
}

/// Sorts a heap in place into descending order under [`Heap::less`] by repeatedly moving the root
/// to the end.
pub fn sort<H: Heap + ?Sized>(h: &mut H) {
    let mut i = h.len();
    while i > 1 {
        i -= 1;
        h.swap(0, i);
        down(h, 0, i);
    }
    if h.len() > 1 && h.less(0, 1) {
        h.swap(0, 1);
    }
}

/// Same as [`sort()`] but built on [`regular_down()`].
pub fn regular_sort<H: Heap + ?Sized>(h: &mut H) {
    let len = h.len();
    let mut i = len.saturating_sub(1);
    while i > 1 {
        h.swap(0, i);
        regular_down(h, 0, i);
        i -= 1;
    }
    if len > 1 {
        let left = h.less(0, 1);
        let right = h.less(1, 0);
        if left || !right {
            h.swap(0, 1);
        }
    }
}

/// Hole-based `sort_heap` over a max-heap under [`Heap::less`], producing ascending order.
///
/// The displaced element rides in the hole, so the hole is never compared while descending.
pub fn sort_heap<H: Heap + ?Sized>(h: &mut H) {
    for i in (1..h.len()).rev() {
        h.swap(0, i);
        adjust(h, i);
    }
}

fn adjust<H: Heap + ?Sized>(h: &mut H, length: usize) {
    let mut second = 0;
    let mut hole = 0;
    while second < length.saturating_sub(1) / 2 {
        second = 2 * (second + 1);
        if h.less(second, second - 1) {
            second -= 1;
        }
        h.swap(hole, second);
        hole = second;
    }
    if length % 2 == 0 && second == (length - 2) / 2 {
        second = 2 * (second + 1);
        h.swap(hole, second - 1);
        hole = second - 1;
    }
    while hole > 0 {
        let parent = (hole - 1) / 2;
        if !h.less(parent, hole) {
            break;
        }
        h.swap(parent, hole);
        hole = parent;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Elements compared by the first field only, so the second field exposes tie handling.
    struct TieHeap(Vec<(i32, char)>);

    impl Heap for TieHeap {
        type Item = (i32, char);

        fn len(&self) -> usize {
            self.0.len()
        }

        fn less(&self, i: usize, j: usize) -> bool {
            self.0[i].0 < self.0[j].0
        }

        fn swap(&mut self, i: usize, j: usize) {
            self.0.swap(i, j);
        }

        fn push_item(&mut self, x: Self::Item) {
            self.0.push(x);
        }

        fn pop_item(&mut self) -> Option<Self::Item> {
            self.0.pop()
        }
    }

    fn ids(h: &TieHeap) -> String {
        h.0.iter().map(|&(_, c)| c).collect()
    }

    #[test]
    fn test_init_orders_distinct_values() {
        let mut h = TieHeap(vec![(3, 'a'), (1, 'b'), (2, 'c')]);
        init(&mut h);
        assert_eq!(vec![(1, 'b'), (3, 'a'), (2, 'c')], h.0);
    }

    #[test]
    fn test_pop_order_with_lone_child() {
        let mut h = TieHeap(vec![]);
        for (i, &s) in [5, 2, 8, 1, 9, 3].iter().enumerate() {
            push(&mut h, (s, char::from(b'a' + i as u8)));
        }
        let mut scores = vec![];
        while let Some((s, _)) = pop(&mut h) {
            scores.push(s);
        }
        // [9, 8] is not reordered because the lone left child does not tie with its parent.
        assert_eq!(vec![1, 2, 3, 5, 9, 8], scores);
    }

    #[test]
    fn test_pop_ties_descend() {
        let mut h = TieHeap(vec![(1, 'a'), (1, 'b'), (1, 'c')]);
        assert_eq!(Some((1, 'a')), pop(&mut h));
        assert_eq!("bc", ids(&h));
        assert_eq!(Some((1, 'b')), pop(&mut h));
        assert_eq!(Some((1, 'c')), pop(&mut h));
        assert_eq!(None, pop(&mut h));
    }

    #[test]
    fn test_lone_left_child_swaps_only_on_tie() {
        let mut h = TieHeap(vec![(5, 'a'), (3, 'b')]);
        init(&mut h);
        assert_eq!("ab", ids(&h));

        let mut h = TieHeap(vec![(3, 'a'), (3, 'b')]);
        init(&mut h);
        assert_eq!("ba", ids(&h));
    }

    #[test]
    fn test_remove() {
        let mut h = TieHeap(vec![]);
        for (i, &s) in [4, 6, 5, 7].iter().enumerate() {
            push(&mut h, (s, char::from(b'a' + i as u8)));
        }
        assert_eq!(Some((6, 'b')), remove(&mut h, 1));
        assert_eq!(None, remove(&mut h, 3));
        let mut scores = vec![];
        while let Some((s, _)) = pop(&mut h) {
            scores.push(s);
        }
        assert_eq!(vec![4, 5, 7], scores);
    }

    #[test]
    fn test_sort_descending() {
        let mut h = TieHeap(vec![(1, 'a'), (3, 'b'), (2, 'c')]);
        sort(&mut h);
        assert_eq!(vec![(3, 'b'), (2, 'c'), (1, 'a')], h.0);
    }

    #[test]
    fn test_sort_and_regular_sort_differ_on_ties() {
        let mut h = TieHeap(vec![(1, 'a'), (1, 'b'), (1, 'c')]);
        sort(&mut h);
        assert_eq!("cba", ids(&h));

        let mut h = TieHeap(vec![(1, 'a'), (1, 'b'), (1, 'c')]);
        regular_sort(&mut h);
        assert_eq!("bca", ids(&h));
    }

    #[test]
    fn test_sort_heap_ascending() {
        let mut h = TieHeap(vec![(5, 'a'), (3, 'b'), (4, 'c'), (1, 'd'), (2, 'e')]);
        sort_heap(&mut h);
        assert_eq!("debca", ids(&h));
    }

    #[test]
    fn test_sort_heap_small() {
        let mut h = TieHeap(vec![]);
        sort_heap(&mut h);
        assert!(h.0.is_empty());

        let mut h = TieHeap(vec![(7, 'a')]);
        sort_heap(&mut h);
        assert_eq!("a", ids(&h));
    }
}
