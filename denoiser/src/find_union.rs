//! Disjoint sets over unique flowgrams. Used to split the sparse distance graph into
//! connected components before the complete-linkage clustering.
#[derive(Debug, Clone, Default)]
pub struct FindUnion {
    /// If parents[i] = j, the j-th node is closer to the representative of the i-th node.
    parents: Vec<usize>,
    /// Valid if and only if the i-th node is the representative of its component.
    sizes: Vec<Option<usize>>,
}

impl FindUnion {
    pub fn new(size: usize) -> Self {
        Self {
            parents: (0..size).collect(),
            sizes: vec![Some(1); size],
        }
    }
    pub fn len(&self) -> usize {
        self.parents.len()
    }
    pub fn is_empty(&self) -> bool {
        self.parents.is_empty()
    }
    /// Find the representative of the [index]-th node. Return None if out of range.
    pub fn find(&mut self, index: usize) -> Option<usize> {
        if self.len() <= index {
            return None;
        }
        let mut root = index;
        while root != self.parents[root] {
            root = self.parents[root];
        }
        let mut index = index;
        while index != root {
            let next = self.parents[index];
            self.parents[index] = root;
            index = next;
        }
        Some(root)
    }
    /// Unite the components of node1 and node2. Return None if either is out of range.
    pub fn unite(&mut self, node1: usize, node2: usize) -> Option<()> {
        let parent1 = self.find(node1)?;
        let parent2 = self.find(node2)?;
        if parent1 != parent2 {
            let (size1, size2) = (self.sizes[parent1]?, self.sizes[parent2]?);
            let (large, small) = match size1 < size2 {
                true => (parent2, parent1),
                false => (parent1, parent2),
            };
            self.parents[small] = large;
            self.sizes[large] = Some(size1 + size2);
            self.sizes[small] = None;
        }
        Some(())
    }
    /// Components, each sorted in increasing order, ordered by their smallest element.
    pub fn components(&mut self) -> Vec<Vec<usize>> {
        let mut slots: Vec<Vec<usize>> = vec![vec![]; self.len()];
        for node in 0..self.len() {
            if let Some(parent) = self.find(node) {
                slots[parent].push(node);
            }
        }
        let mut components: Vec<_> = slots.into_iter().filter(|c| !c.is_empty()).collect();
        components.sort_by_key(|c| c[0]);
        components
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn unite() {
        let mut fu = FindUnion::new(10);
        assert_eq!(Some(()), fu.unite(1, 3));
        assert_eq!(None, fu.unite(100, 0));
        assert_eq!(None, fu.unite(3, 10));
        assert!(FindUnion::new(0).is_empty());
    }
    #[test]
    fn find() {
        let mut fu = FindUnion::new(10);
        fu.unite(0, 1);
        fu.unite(4, 2);
        fu.unite(1, 4);
        assert_eq!(fu.find(0), fu.find(2));
        assert_ne!(fu.find(0), fu.find(8));
        assert_eq!(fu.find(213), None);
    }
    #[test]
    fn chain() {
        let mut fu = FindUnion::new(10);
        for i in 0..9 {
            fu.unite(i, i + 1);
        }
        let root = fu.find(0);
        assert!((0..10).all(|i| fu.find(i) == root));
        assert_eq!(fu.components().len(), 1);
    }
    #[test]
    fn components() {
        let mut fu = FindUnion::new(6);
        fu.unite(5, 1);
        fu.unite(2, 3);
        fu.unite(3, 5);
        assert_eq!(fu.components(), vec![vec![0], vec![1, 2, 3, 5], vec![4]]);
    }
}
