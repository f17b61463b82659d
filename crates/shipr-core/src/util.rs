//! Small helpers shared across the crate.

/// Join items with commas and an "and" before the final one.
///
/// # Examples
///
/// ```
/// use shipr_core::util::join_with_oxford_commas;
///
/// assert_eq!(join_with_oxford_commas(&["a"]), "a");
/// assert_eq!(
///     join_with_oxford_commas(&["a", "b", "c"]),
///     "a, b, and c"
/// );
/// ```
pub fn join_with_oxford_commas<T: std::fmt::Display>(items: &[T]) -> String {
    match items.len() {
        0 => String::new(),
        1 => items[0].to_string(),
        len => {
            let head: Vec<String> = items[..len - 1].iter().map(|i| i.to_string()).collect();
            format!("{}, and {}", head.join(", "), items[len - 1])
        }
    }
}
