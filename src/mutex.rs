use core::{
    cell::UnsafeCell,
    sync::atomic::AtomicBool,
    sync::atomic::Ordering::*,
    future::poll_fn,
    task::Poll,
    ops::{Deref, DerefMut},
    };

/**
    mutex without any waiting queue, only made of an atomic flag

    [Self::try_lock] never waits, which lets a request finding the value locked be refused instead of delayed
*/
pub struct BusyMutex<T> {
    value: UnsafeCell<T>,
    locked: AtomicBool,
}
unsafe impl<T: Send> Send for BusyMutex<T> {}
unsafe impl<T: Send> Sync for BusyMutex<T> {}

impl<T> BusyMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            locked: AtomicBool::new(false),
        }
    }
    pub fn try_lock(&self) -> Option<BusyMutexGuard<'_, T>> {
        BusyMutexGuard::try_new(self)
    }
    /// busy polling future until lock is acquired
    pub async fn lock(&self) -> BusyMutexGuard<'_, T> {
        poll_fn(|cx| match BusyMutexGuard::try_new(self) {
            Some(guard) => Poll::Ready(guard),
            None => {
                cx.waker().wake_by_ref();
                Poll::Pending
            },
            }).await
    }
    /// busy wait until lock is acquired
    pub fn blocking_lock(&self) -> BusyMutexGuard<'_, T> {
        loop {
            if let Some(pending) = BusyMutexGuard::try_new(self)
                {break pending}
            // nothing else to do, leave resources to the kernel
            #[cfg(feature = "std")]
            std::thread::yield_now();
            #[cfg(not(feature = "std"))]
            core::hint::spin_loop();
        }
    }
    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}
impl<T> From<T> for BusyMutex<T> {
    fn from(value: T) -> Self {Self::new(value)}
}
impl<T: Default> Default for BusyMutex<T> {
    fn default() -> Self {Self::new(T::default())}
}

pub struct BusyMutexGuard<'m, T> {
    mutex: &'m BusyMutex<T>,
}
impl<'m, T> BusyMutexGuard<'m, T> {
    fn try_new(mutex: &'m BusyMutex<T>) -> Option<Self> {
        // previous value false means we took it
        if mutex.locked.swap(true, Acquire)
            {None}
        else
            {Some(Self {mutex})}
    }
}
impl<T> Deref for BusyMutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        unsafe {& *self.mutex.value.get()}
    }
}
impl<T> DerefMut for BusyMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe {&mut *self.mutex.value.get()}
    }
}
impl<T> Drop for BusyMutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Release);
    }
}
