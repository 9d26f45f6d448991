use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rayon::prelude::*;

pub(crate) fn calculate_hash<T: Hash>(t: &T) -> u64 {
    let mut s = DefaultHasher::new();
    t.hash(&mut s);
    s.finish()
}

/// Applies `f` to chunks of `data` in parallel, one chunk per available core.
pub(crate) fn par_chunks<T, F, R>(data: &[T], f: F) -> impl Iterator<Item = R>
where
    T: Sync,
    R: Send,
    F: Fn(&[T]) -> Vec<R> + Sync,
{
    let (s, r) = crossbeam_channel::unbounded();
    let nr_cpus = num_cpus::get();
    let nr_elems = data.len();
    let chunk_size = std::cmp::max(nr_elems / nr_cpus, 1);
    data.chunks(chunk_size)
        .par_bridge()
        .for_each_with(s, |s, chunk| {
            let v = f(chunk);
            s.send(v).unwrap(); // channel will not become disconnected
        });
    r.into_iter().flat_map(|v| v.into_iter())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn par_chunks_covers_all_elements() {
        let data = (0..1000).collect::<Vec<_>>();
        let mut out = par_chunks(&data, |chunk| chunk.iter().map(|&x| x * 2).collect())
            .collect::<Vec<_>>();
        out.sort();
        assert_eq!(out, (0..1000).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn hash_is_deterministic() {
        let v = vec![(1usize, 2usize), (3, 4)];
        assert_eq!(calculate_hash(&v), calculate_hash(&v.clone()));
    }
}
