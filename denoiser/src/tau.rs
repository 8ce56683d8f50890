//! Sparse read-to-OTU responsibilities.
//!
//! The entries are appended read by read, so the entries of a read are contiguous and
//! are found by `read_offsets`. The membership index is the transposed view, OTU to entries,
//! built with a counting sort.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TauEntry {
    pub read: usize,
    pub otu: usize,
    pub tau: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TauTable {
    entries: Vec<TauEntry>,
    // The entries of the i-th read are entries[read_offsets[i]..read_offsets[i+1]].
    read_offsets: Vec<usize>,
}

impl TauTable {
    /// An empty table, to be filled by `push_read` in increasing order of reads.
    pub fn with_capacity(num_reads: usize, num_entries: usize) -> Self {
        let mut read_offsets = Vec::with_capacity(num_reads + 1);
        read_offsets.push(0);
        Self {
            entries: Vec::with_capacity(num_entries),
            read_offsets,
        }
    }
    /// Each read fully assigned to one OTU.
    pub fn hard(assignment: &[usize]) -> Self {
        let mut table = Self::with_capacity(assignment.len(), assignment.len());
        for &otu in assignment.iter() {
            table.push_read(std::iter::once((otu, 1f64)));
        }
        table
    }
    /// Append the entries of the next read.
    pub fn push_read<I: IntoIterator<Item = (usize, f64)>>(&mut self, entries: I) {
        let read = self.num_reads();
        self.entries
            .extend(entries.into_iter().map(|(otu, tau)| TauEntry { read, otu, tau }));
        self.read_offsets.push(self.entries.len());
    }
    pub fn num_reads(&self) -> usize {
        self.read_offsets.len() - 1
    }
    pub fn len(&self) -> usize {
        self.entries.len()
    }
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
    pub fn entries(&self) -> &[TauEntry] {
        &self.entries
    }
    pub fn entry(&self, index: usize) -> &TauEntry {
        &self.entries[index]
    }
    pub fn of_read(&self, read: usize) -> &[TauEntry] {
        &self.entries[self.read_offsets[read]..self.read_offsets[read + 1]]
    }
    /// The OTU with the largest tau for each read. Ties go to the lowest OTU id.
    pub fn argmax(&self) -> Vec<Option<usize>> {
        (0..self.num_reads())
            .map(|read| {
                self.of_read(read)
                    .iter()
                    .fold(None, |best: Option<&TauEntry>, entry| match best {
                        Some(b) if entry.tau < b.tau => Some(b),
                        Some(b) if entry.tau == b.tau && b.otu < entry.otu => Some(b),
                        _ => Some(entry),
                    })
                    .map(|entry| entry.otu)
            })
            .collect()
    }
    pub fn membership(&self, num_otus: usize) -> Membership {
        let mut offsets = vec![0; num_otus + 1];
        for entry in self.entries.iter() {
            offsets[entry.otu + 1] += 1;
        }
        for i in 0..num_otus {
            offsets[i + 1] += offsets[i];
        }
        let mut slots = offsets.clone();
        let mut members = vec![0; self.entries.len()];
        for (idx, entry) in self.entries.iter().enumerate() {
            members[slots[entry.otu]] = idx;
            slots[entry.otu] += 1;
        }
        Membership { offsets, members }
    }
}

/// OTU to tau entries. Within an OTU, entries are in increasing order of reads.
#[derive(Debug, Clone, Default)]
pub struct Membership {
    offsets: Vec<usize>,
    members: Vec<usize>,
}

impl Membership {
    pub fn num_otus(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
    /// Indices of the tau entries of the OTU.
    pub fn of_otu(&self, otu: usize) -> &[usize] {
        &self.members[self.offsets[otu]..self.offsets[otu + 1]]
    }
    pub fn size(&self, otu: usize) -> usize {
        self.offsets[otu + 1] - self.offsets[otu]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    fn table() -> TauTable {
        let mut table = TauTable::with_capacity(3, 5);
        table.push_read(vec![(0, 0.7), (2, 0.3)]);
        table.push_read(vec![(2, 1.0)]);
        table.push_read(vec![(1, 0.5), (0, 0.5)]);
        table
    }
    #[test]
    fn lookup_by_read() {
        let table = table();
        assert_eq!(table.num_reads(), 3);
        assert_eq!(table.len(), 5);
        assert_eq!(table.of_read(0).len(), 2);
        assert_eq!(table.of_read(1)[0].otu, 2);
        assert!(table.of_read(2).iter().all(|e| e.read == 2));
    }
    #[test]
    fn membership() {
        let table = table();
        let membership = table.membership(4);
        assert_eq!(membership.num_otus(), 4);
        let reads = |otu: usize| -> Vec<usize> {
            membership
                .of_otu(otu)
                .iter()
                .map(|&e| table.entry(e).read)
                .collect()
        };
        assert_eq!(reads(0), vec![0, 2]);
        assert_eq!(reads(1), vec![2]);
        assert_eq!(reads(2), vec![0, 1]);
        assert!(reads(3).is_empty());
        assert_eq!(membership.size(2), 2);
    }
    #[test]
    fn argmax_breaks_ties_by_lowest_otu() {
        let mut table = table();
        table.push_read(vec![]);
        assert_eq!(table.argmax(), vec![Some(0), Some(2), Some(0), None]);
    }
    #[test]
    fn hard_table() {
        let table = TauTable::hard(&[1, 0, 1]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.membership(2).of_otu(1), &[0, 2]);
        assert!(table.entries().iter().all(|e| e.tau == 1f64));
    }
}
