/// One growth step of an [OpenMap](super::OpenMap) table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSize {
    /// Number of live entries allowed before the table grows.
    pub max_entries: u64,
    /// Number of slots in the table.
    pub size: u64,
    /// Modulus of the probe step; a prime just below `size`.
    pub rehash: u64,
}

const fn ts(max_entries: u64, size: u64, rehash: u64) -> TableSize {
    TableSize {
        max_entries,
        size,
        rehash,
    }
}

// `size` and `rehash` are twin primes (p, p - 2) and `size` keeps about 10% free slots,
// so a probe sequence visits every slot and never degrades to a linear scan.
pub(crate) const HASH_SIZES: [TableSize; 31] = [
    ts(2, 5, 3),
    ts(4, 7, 5),
    ts(8, 13, 11),
    ts(16, 19, 17),
    ts(32, 43, 41),
    ts(64, 73, 71),
    ts(128, 151, 149),
    ts(256, 283, 281),
    ts(512, 571, 569),
    ts(1024, 1153, 1151),
    ts(2048, 2269, 2267),
    ts(4096, 4519, 4517),
    ts(8192, 9013, 9011),
    ts(16384, 18043, 18041),
    ts(32768, 36109, 36107),
    ts(65536, 72091, 72089),
    ts(131072, 144409, 144407),
    ts(262144, 288361, 288359),
    ts(524288, 576883, 576881),
    ts(1048576, 1153459, 1153457),
    ts(2097152, 2307163, 2307161),
    ts(4194304, 4613893, 4613891),
    ts(8388608, 9227641, 9227639),
    ts(16777216, 18455029, 18455027),
    ts(33554432, 36911011, 36911009),
    ts(67108864, 73819861, 73819859),
    ts(134217728, 147639589, 147639587),
    ts(268435456, 295279081, 295279079),
    ts(536870912, 590559793, 590559791),
    ts(1073741824, 1181116273, 1181116271),
    ts(2147483648, 2362232233, 2362232231),
];
