/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let fields = read_lock!(object.fields);
///  println!("{}", fields.len());
/// ```
macro_rules! read_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut slot = write_lock!(local);
///  *slot = EmValue::I32(42);
/// ```
macro_rules! write_lock {
    ($arc_rwlock:expr) => {
        $arc_rwlock.write().expect("Failed to acquire write lock")
    };
}
