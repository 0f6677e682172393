/// Tuning knobs for a single index instance.
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// A bucket whose size counter passes this value is halved.
    split_threshold: i64,
    /// Rows fetched per scanner page.
    scan_caching: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            split_threshold: 1000,
            scan_caching: 1000,
        }
    }
}

impl IndexConfig {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_split_threshold(mut self, threshold: i64) -> Self {
        self.split_threshold = threshold;
        self
    }

    pub fn with_scan_caching(mut self, caching: usize) -> Self {
        self.scan_caching = caching;
        self
    }

    #[inline(always)]
    pub fn split_threshold(&self) -> i64 {
        self.split_threshold
    }

    #[inline(always)]
    pub fn scan_caching(&self) -> usize {
        self.scan_caching
    }
}
