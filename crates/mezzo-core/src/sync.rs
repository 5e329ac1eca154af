//! Lock helpers that recover the guard from a poisoned lock.

use std::sync::{ Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard };


pub( crate ) fn lock<T: ?Sized>( mutex: &Mutex<T> ) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else( PoisonError::into_inner )
}


pub( crate ) fn read<T: ?Sized>( lock: &RwLock<T> ) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else( PoisonError::into_inner )
}


pub( crate ) fn write<T: ?Sized>( lock: &RwLock<T> ) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else( PoisonError::into_inner )
}
