#[cfg(feature = "loom")]
mod imp {
    pub(crate) use loom::{
        cell::UnsafeCell,
        sync::{
            Mutex, MutexGuard,
            atomic::{AtomicU8, AtomicU32, Ordering},
        },
        thread::yield_now,
    };
}

#[cfg(not(feature = "loom"))]
mod imp {
    pub(crate) use core::{
        cell::UnsafeCell,
        sync::atomic::{AtomicU8, AtomicU32, Ordering},
    };
    pub(crate) use parking_lot::{Mutex, MutexGuard};
    pub(crate) use std::thread::yield_now;
}

pub(crate) use imp::*;
