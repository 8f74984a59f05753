//! Calendar queue.

use std::collections::VecDeque;

use crate::time::{MonotonicTime, Tag};

/// Configuration of a [`CalendarQueue`].
///
/// The defaults reproduce the classic calendar parameters: start with 2 bins,
/// double or halve the bin count when the average occupancy leaves the
/// [0.5, 2] band, and recompute the bin width from a sample of resident
/// entries on every such resize.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QueueConfig {
    /// Lower bound on the number of bins.
    pub min_bins: usize,
    /// Factor by which the bin count is grown or shrunk when rebinning.
    pub bin_growth: usize,
    /// Whether the bin count and bin width adapt to the queue content. When
    /// disabled, the queue keeps its initial bin count and a fixed width.
    pub adaptive: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            min_bins: 2,
            bin_growth: 2,
            adaptive: true,
        }
    }
}

/// Default bin width, used until enough entries were sampled to derive one.
const DEFAULT_BIN_WIDTH: f64 = 1.0; // [s]

/// Maximum number of entries sampled when recomputing the bin width.
const MAX_WIDTH_SAMPLES: usize = 25;

/// A priority multiset of tagged values with expected *O*(1) insertion and
/// extraction.
///
/// Entries are grouped into fixed-width bins ("days") indexed by their
/// timestamp; the bin array is walked like the pages of a calendar, so
/// extraction does not need to order bins globally. Whenever the entry count
/// leaves the band that keeps average bin occupancy near one, the bin count
/// is grown or shrunk and the bin width is recomputed from a sample of
/// resident entries.
///
/// The extraction order is the total order of [`Tag`]; entries with fully
/// equal tags are extracted in insertion (FIFO) order, which is enforced with
/// a monotonically increasing sequence number in the manner of an epoch.
/// Insertion is idempotent: a value-equal entry with an equal tag makes
/// [`put()`](CalendarQueue::put) a no-op.
pub(crate) struct CalendarQueue<V> {
    bins: Vec<VecDeque<Entry<V>>>,
    /// Bin width, in seconds of the timestamp axis.
    width: f64,
    /// Timestamp of virtual bin 0; set on first insertion and on rebinning.
    zero_ref: Option<MonotonicTime>,
    /// Virtual bin which the cyclic search starts from.
    cursor_virtual: i64,
    /// Concrete bin which the cyclic search starts from.
    cursor_bin: usize,
    /// Smallest tag seen among resident entries, if any.
    min_tag: Option<Tag>,
    len: usize,
    next_seq: u64,
    resize_enabled: bool,
    config: QueueConfig,
}

impl<V: PartialEq> CalendarQueue<V> {
    /// Creates an empty queue.
    ///
    /// Out-of-range configuration values are clamped: at least one bin, and
    /// a growth factor of at least 2.
    pub(crate) fn new(mut config: QueueConfig) -> Self {
        config.min_bins = config.min_bins.max(1);
        config.bin_growth = config.bin_growth.max(2);
        let bins = config.min_bins;

        Self {
            bins: (0..bins).map(|_| VecDeque::new()).collect(),
            width: DEFAULT_BIN_WIDTH,
            zero_ref: None,
            cursor_virtual: 0,
            cursor_bin: 0,
            min_tag: None,
            len: 0,
            next_seq: 0,
            resize_enabled: true,
            config,
        }
    }

    /// Returns the number of entries in the queue.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the queue holds no entry.
    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a tagged value, unless a value-equal entry with an equal tag
    /// is already resident.
    ///
    /// Returns `true` if the entry was actually inserted.
    pub(crate) fn put(&mut self, tag: Tag, value: V) -> bool {
        if self.contains(tag, &value) {
            return false;
        }
        if self.zero_ref.is_none() {
            // Deferred initialization: anchor the calendar on the first
            // entry.
            self.zero_ref = Some(tag.time);
            self.cursor_virtual = 0;
            self.cursor_bin = 0;
        }

        let seq = self.next_seq;
        assert_ne!(seq, u64::MAX);
        self.next_seq += 1;

        let virtual_bin = self.virtual_bin(tag.time);
        let bin = self.concrete_bin(virtual_bin);

        // Keep the bin sorted by (tag, seq); equal keys keep FIFO order since
        // `seq` increases monotonically.
        let entries = &mut self.bins[bin];
        let pos = entries.partition_point(|e| (e.tag, e.seq) <= (tag, seq));
        entries.insert(pos, Entry { tag, seq, value });
        self.len += 1;

        // A new minimum moves the calendar cursor back to its page.
        if self.min_tag.map_or(true, |min| tag < min) {
            self.min_tag = Some(tag);
            self.cursor_virtual = virtual_bin;
            self.cursor_bin = bin;
        }

        if self.len > 2 * self.bins.len() {
            self.rebin(self.bins.len().saturating_mul(self.config.bin_growth));
        }

        true
    }

    /// Peeks a reference to the entry with the smallest tag, leaving it in
    /// the queue.
    ///
    /// Equal smallest tags yield the entry that was inserted first.
    pub(crate) fn peek(&self) -> Option<(&Tag, &V)> {
        let bin = self.min_bin()?;
        let entry = self.bins[bin].front().unwrap();

        Some((&entry.tag, &entry.value))
    }

    /// Removes and returns the entry with the smallest tag.
    ///
    /// Equal smallest tags yield the entry that was inserted first.
    pub(crate) fn take(&mut self) -> Option<(Tag, V)> {
        let bin = self.min_bin()?;
        let entry = self.bins[bin].pop_front().unwrap();
        self.len -= 1;

        // Resume the next search from the page of the extracted entry.
        self.min_tag = Some(entry.tag);
        self.cursor_virtual = self.virtual_bin(entry.tag.time);
        self.cursor_bin = bin;

        if self.bins.len() > self.config.min_bins && self.len < (self.bins.len() / 2).saturating_sub(2)
        {
            self.rebin((self.bins.len() / self.config.bin_growth).max(self.config.min_bins));
        }

        Some((entry.tag, entry.value))
    }

    /// Returns `true` if a value-equal entry with an equal tag is resident.
    pub(crate) fn contains(&self, tag: Tag, value: &V) -> bool {
        if self.len == 0 || self.zero_ref.is_none() {
            return false;
        }
        let bin = self.concrete_bin(self.virtual_bin(tag.time));

        self.bins[bin]
            .iter()
            .any(|e| e.tag == tag && e.value == *value)
    }

    /// Removes all entries.
    pub(crate) fn clear(&mut self) {
        for bin in &mut self.bins {
            bin.clear();
        }
        self.len = 0;
        self.zero_ref = None;
        self.min_tag = None;
        self.cursor_virtual = 0;
        self.cursor_bin = 0;
    }

    /// Rewrites the depth of every resident entry.
    ///
    /// The mapping function must leave the timestamp and microstep untouched;
    /// only the depth of the returned tag is applied. Relative FIFO order of
    /// entries with equal resulting tags is preserved.
    pub(crate) fn remap_depths(&mut self, mut f: impl FnMut(&Tag, &V) -> u64) {
        for bin in &mut self.bins {
            if bin.is_empty() {
                continue;
            }
            let mut entries: Vec<Entry<V>> = bin.drain(..).collect();
            for entry in &mut entries {
                entry.tag = entry.tag.with_depth(f(&entry.tag, &entry.value));
            }
            entries.sort_by_key(|e| (e.tag, e.seq));
            bin.extend(entries);
        }

        // The cached minimum may now point at a stale depth.
        self.min_tag = None;
        if let Some(bin) = self.direct_search() {
            let tag = self.bins[bin].front().unwrap().tag;
            self.min_tag = Some(tag);
            self.cursor_virtual = self.virtual_bin(tag.time);
            self.cursor_bin = bin;
        }
    }

    /// Returns the index of the bin holding the entry with the smallest tag.
    fn min_bin(&self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }

        // Walk the calendar cyclically, starting from the cursor page. A bin
        // qualifies only if its head entry actually belongs to the page being
        // visited; a head from a later "year" must wait for a later page.
        let n = self.bins.len();
        for lap in 0..n {
            let bin = (self.cursor_bin + lap) % n;
            if let Some(head) = self.bins[bin].front() {
                if self.virtual_bin(head.tag.time) == self.cursor_virtual + lap as i64 {
                    return Some(bin);
                }
            }
        }

        // One full cycle found nothing in its own page: the remaining entries
        // are sparse, fall back to comparing the bin heads directly.
        self.direct_search()
    }

    /// Finds the bin with the smallest head entry by brute force.
    fn direct_search(&self) -> Option<usize> {
        self.bins
            .iter()
            .enumerate()
            .filter_map(|(i, bin)| bin.front().map(|e| (i, (e.tag, e.seq))))
            .min_by_key(|&(_, key)| key)
            .map(|(i, _)| i)
    }

    /// Returns the virtual (un-wrapped) bin index of a timestamp.
    fn virtual_bin(&self, time: MonotonicTime) -> i64 {
        let zero = self.zero_ref.expect("the calendar queue is uninitialized");
        let delta = (time.as_secs() - zero.as_secs()) as f64
            + (time.subsec_nanos() as f64 - zero.subsec_nanos() as f64) * 1e-9;

        (delta / self.width).floor() as i64
    }

    /// Maps a virtual bin index onto the bin array.
    fn concrete_bin(&self, virtual_bin: i64) -> usize {
        virtual_bin.rem_euclid(self.bins.len() as i64) as usize
    }

    /// Re-creates the calendar with the specified number of bins and a bin
    /// width recomputed from the resident entries.
    fn rebin(&mut self, bins: usize) {
        if !self.config.adaptive || !self.resize_enabled || bins == self.bins.len() {
            return;
        }
        self.resize_enabled = false;

        let mut entries: Vec<Entry<V>> = self.bins.iter_mut().flat_map(|b| b.drain(..)).collect();
        entries.sort_by_key(|e| (e.tag, e.seq));

        self.width = compute_width(&entries).unwrap_or(self.width);
        self.bins = (0..bins.max(1)).map(|_| VecDeque::new()).collect();
        self.zero_ref = entries.first().map(|e| e.tag.time);

        if let Some(first) = entries.first() {
            self.min_tag = Some(first.tag);
            self.cursor_virtual = self.virtual_bin(first.tag.time);
            self.cursor_bin = self.concrete_bin(self.cursor_virtual);
        } else {
            self.min_tag = None;
            self.cursor_virtual = 0;
            self.cursor_bin = 0;
        }

        // Entries are re-inserted in sorted order, so each bin stays sorted
        // by construction.
        for entry in entries {
            let bin = self.concrete_bin(self.virtual_bin(entry.tag.time));
            self.bins[bin].push_back(entry);
        }

        self.resize_enabled = true;
    }
}

impl<V> std::fmt::Debug for CalendarQueue<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalendarQueue")
            .field("len", &self.len)
            .field("bins", &self.bins.len())
            .field("width", &self.width)
            .finish_non_exhaustive()
    }
}

/// A single resident entry.
struct Entry<V> {
    tag: Tag,
    /// Insertion epoch, breaking ties between fully equal tags.
    seq: u64,
    value: V,
}

/// Derives a bin width such that, on average, each non-empty bin holds about
/// one entry.
///
/// The width is estimated from the separation of the earliest entries: up to
/// [`MAX_WIDTH_SAMPLES`] timestamps are examined, separations beyond twice
/// the raw average are discarded as outliers, and the width is set to 3x the
/// remaining average. Returns `None` when no usable estimate exists, e.g.
/// when all sampled entries are simultaneous.
fn compute_width<V>(sorted: &[Entry<V>]) -> Option<f64> {
    if sorted.len() < 2 {
        return None;
    }
    let samples = if sorted.len() <= 5 {
        sorted.len()
    } else {
        (5 + sorted.len() / 10).min(MAX_WIDTH_SAMPLES)
    };

    let separations: Vec<f64> = sorted
        .windows(2)
        .take(samples - 1)
        .map(|w| {
            (w[1].tag.time.as_secs() - w[0].tag.time.as_secs()) as f64
                + (w[1].tag.time.subsec_nanos() as f64 - w[0].tag.time.subsec_nanos() as f64)
                    * 1e-9
        })
        .collect();
    let average = separations.iter().sum::<f64>() / separations.len() as f64;

    let effective: Vec<f64> = separations
        .iter()
        .copied()
        .filter(|&d| d < 2.0 * average)
        .collect();
    if effective.is_empty() {
        return None;
    }
    let width = 3.0 * effective.iter().sum::<f64>() / effective.len() as f64;

    (width > 0.0).then_some(width)
}
