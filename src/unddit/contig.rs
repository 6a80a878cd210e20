use serde::{Deserialize, Serialize};

/// Inclusive range of creation times fully pulled from the archive.
///
/// `last_created` is `None` until the first round over the range returns
/// anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contig {
    pub first_created: i64,
    pub last_created: Option<i64>,
    pub loaded_all_comments: bool,
}

impl Contig {
    pub fn open(first_created: i64) -> Self {
        Self {
            first_created,
            last_created: None,
            loaded_all_comments: false,
        }
    }

    fn contains(&self, created: i64) -> bool {
        created >= self.first_created && self.last_created.is_some_and(|last| created <= last)
    }
}

/// Outcome of one archive round over a contig's open interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoundResult {
    pub last_seen: Option<i64>,
    pub covered_to_end: bool,
}

/// Sorted, non-overlapping contigs of one thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContigList {
    contigs: Vec<Contig>,
}

impl ContigList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_contigs(mut contigs: Vec<Contig>) -> Self {
        contigs.sort_by_key(|c| c.first_created);
        let mut out = Self::new();
        for contig in contigs {
            match out.contigs.last_mut() {
                Some(prev)
                    if prev
                        .last_created
                        .is_some_and(|last| last >= contig.first_created) =>
                {
                    prev.last_created = prev.last_created.max(contig.last_created);
                    prev.loaded_all_comments |= contig.loaded_all_comments;
                }
                _ => out.contigs.push(contig),
            }
        }
        out
    }

    pub fn as_slice(&self) -> &[Contig] {
        &self.contigs
    }

    pub fn len(&self) -> usize {
        self.contigs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contigs.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Contig> {
        self.contigs.get(index)
    }

    /// Index of the contig covering `created`, opening a new one there if
    /// none does.
    pub fn open_at(&mut self, created: i64) -> usize {
        if let Some(index) = self.contigs.iter().position(|c| c.contains(created)) {
            return index;
        }
        if let Some(index) = self
            .contigs
            .iter()
            .position(|c| c.first_created == created)
        {
            return index;
        }
        let index = self.contigs.partition_point(|c| c.first_created < created);
        self.contigs.insert(index, Contig::open(created));
        index
    }

    /// Archive cursor bounds for the next round: `(after, before)`, both
    /// exclusive.
    pub fn window(&self, index: usize) -> Option<(i64, Option<i64>)> {
        let contig = self.contigs.get(index)?;
        let floor = contig.first_created - 1;
        let after = contig.last_created.map_or(floor, |last| last.max(floor));
        let before = self.contigs.get(index + 1).map(|next| next.first_created);
        Some((after, before))
    }

    /// Record a finished round and merge with the following contig when the
    /// two now touch. Returns the index of the (possibly merged) contig.
    pub fn complete_round(&mut self, index: usize, round: RoundResult) -> usize {
        let Some(contig) = self.contigs.get_mut(index) else {
            return index;
        };
        if let Some(seen) = round.last_seen {
            contig.last_created = Some(contig.last_created.map_or(seen, |last| last.max(seen)));
        }
        if round.covered_to_end {
            contig.loaded_all_comments = true;
        }

        let reached_next = match (self.contigs[index].last_created, self.contigs.get(index + 1)) {
            (_, None) => false,
            (Some(last), Some(next)) => last >= next.first_created || round.covered_to_end,
            (None, Some(_)) => round.covered_to_end,
        };
        if reached_next {
            let next = self.contigs.remove(index + 1);
            let contig = &mut self.contigs[index];
            contig.last_created = match (contig.last_created, next.last_created) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b).or(Some(next.first_created)),
            };
            contig.loaded_all_comments = next.loaded_all_comments;
            log::debug!(
                "merged contigs at {}..{:?}",
                contig.first_created,
                contig.last_created
            );
        }
        index
    }

    pub fn is_sorted_disjoint(&self) -> bool {
        self.contigs.windows(2).all(|pair| {
            let (a, b) = (&pair[0], &pair[1]);
            a.first_created < b.first_created
                && a.last_created.is_none_or(|last| last < b.first_created)
        })
    }
}
