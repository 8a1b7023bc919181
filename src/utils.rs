use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Locks a mutex, recovering the data of a poisoned lock.
///
/// Every critical section in this crate leaves the protected value consistent, so a panic in
/// another thread does not invalidate it.
#[inline(always)]
pub fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[inline(always)]
pub fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

#[inline(always)]
pub fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

pub trait FromU64 {
    fn from_u64(src: u64) -> Self;
}

impl FromU64 for i64 {
    /// Saturates at `i64::MAX`; generations never get that far.
    #[inline(always)]
    fn from_u64(src: u64) -> Self {
        Self::try_from(src).unwrap_or(Self::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lock_poisoned() {
        let m = Arc::new(Mutex::new(3));
        let m2 = Arc::clone(&m);
        let _ = thread::spawn(move || {
            let _guard = m2.lock().unwrap();
            panic!("poison");
        })
        .join();
        assert!(m.is_poisoned());
        assert_eq!(3, *lock(&m));
    }

    #[test]
    fn test_from_u64() {
        assert_eq!(7, i64::from_u64(7));
        assert_eq!(i64::MAX, i64::from_u64(u64::MAX));
    }
}
