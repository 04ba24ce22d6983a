/// Build a sequence of `|end - start| + 1` clones of `fill`.
///
/// The bounds are inclusive and may arrive in either order; the range is
/// normalized before iterating, so the call terminates for every input.
pub fn fill_range<T: Clone>(start: i64, end: i64, fill: T) -> Vec<T> {
    let (lo, hi) = if start <= end { (start, end) } else { (end, start) };
    let len = (hi - lo) as usize + 1;
    let mut out = Vec::with_capacity(len);
    for _ in lo..=hi {
        out.push(fill.clone());
    }
    out
}

/// The buffer a fresh pad starts with: ten blank lines.
pub fn placeholder_buffer() -> String {
    fill_range(0, 9, '\n').into_iter().collect()
}
