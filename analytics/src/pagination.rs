/// Returns page `page` (1-based) of `items`. Pages past the end, and page 0,
/// are empty rather than an error.
pub fn paginate<T>(items: &[T], page: usize, page_size: usize) -> &[T] {
    if page == 0 || page_size == 0 {
        return &[];
    }

    let Some(offset) = (page - 1).checked_mul(page_size) else {
        return &[];
    };
    if offset >= items.len() {
        return &[];
    }

    let end = offset.saturating_add(page_size).min(items.len());
    &items[offset..end]
}
