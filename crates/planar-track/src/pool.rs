//! Bounded, thread-safe buffer pools for per-frame scratch.
//!
//! Three independent pools back the pipeline: grayscale frame buffers,
//! descriptor matrices, and coordinate lists. Acquisition prefers a free
//! slot whose buffer already has the requested shape, falls back to lazily
//! allocating into an empty slot, and finally hands out an unpooled
//! overflow buffer that is freed on release instead of returned.
//!
//! Loans are scoped: [`PooledBuffer`] gives the slot back when dropped, on
//! every exit path. Buffer contents are never zeroed between loans.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nalgebra::Point2;
use planar_track_core::{DescriptorSet, GrayImage};
use serde::{Deserialize, Serialize};

use crate::config::PoolParams;

struct Slot<T> {
    /// `None` while loaned out or never allocated.
    buffer: Option<T>,
    in_use: bool,
}

type Shelf<T> = Mutex<Vec<Slot<T>>>;

struct Inner {
    frames: Shelf<GrayImage>,
    descriptors: Shelf<DescriptorSet>,
    points: Shelf<Vec<Point2<f32>>>,
}

mod sealed {
    use super::{DescriptorSet, GrayImage, Inner, Point2, Shelf};

    pub trait Route: Sized {
        fn shelf(inner: &Inner) -> &Shelf<Self>;
    }

    impl Route for GrayImage {
        fn shelf(inner: &Inner) -> &Shelf<Self> {
            &inner.frames
        }
    }

    impl Route for DescriptorSet {
        fn shelf(inner: &Inner) -> &Shelf<Self> {
            &inner.descriptors
        }
    }

    impl Route for Vec<Point2<f32>> {
        fn shelf(inner: &Inner) -> &Shelf<Self> {
            &inner.points
        }
    }
}

/// Buffer kinds the pool manages: [`GrayImage`], [`DescriptorSet`], and
/// `Vec<Point2<f32>>`. Not implementable outside this crate.
pub trait PoolItem: sealed::Route + Default + Send {}

impl PoolItem for GrayImage {}
impl PoolItem for DescriptorSet {}
impl PoolItem for Vec<Point2<f32>> {}

fn lock<T>(shelf: &Shelf<T>) -> MutexGuard<'_, Vec<Slot<T>>> {
    // a poisoned shelf is still structurally sound: every mutation is a
    // single field store under the lock
    shelf.lock().unwrap_or_else(PoisonError::into_inner)
}

fn new_shelf<T>(capacity: usize) -> Shelf<T> {
    Mutex::new(
        (0..capacity)
            .map(|_| Slot {
                buffer: None,
                in_use: false,
            })
            .collect(),
    )
}

/// Cheap cloneable handle to the shared pools. Clones refer to the same
/// slots; the handle is `Send + Sync` and loans may cross threads.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<Inner>,
}

impl BufferPool {
    pub fn new(params: PoolParams) -> Self {
        Self {
            inner: Arc::new(Inner {
                frames: new_shelf(params.frame_slots),
                descriptors: new_shelf(params.descriptor_slots),
                points: new_shelf(params.point_slots),
            }),
        }
    }

    fn loan<T: PoolItem>(&self, slots: &mut Vec<Slot<T>>, index: usize) -> PooledBuffer<T> {
        slots[index].in_use = true;
        let buffer = slots[index].buffer.take().unwrap_or_default();
        PooledBuffer {
            pool: self.clone(),
            slot: Some(index),
            buffer,
        }
    }

    /// A frame buffer of exactly `width x height`. Reuses a free buffer of
    /// the same dimensions when one exists; contents are stale on reuse.
    pub fn acquire_frame(&self, width: usize, height: usize) -> PooledBuffer<GrayImage> {
        let mut slots = lock(&self.inner.frames);
        if let Some(i) = slots.iter().position(|s| {
            !s.in_use
                && s.buffer
                    .as_ref()
                    .is_some_and(|f| f.width == width && f.height == height)
        }) {
            return self.loan(&mut slots, i);
        }
        let empty = slots.iter().position(|s| !s.in_use && s.buffer.is_none());
        if let Some(i) = empty {
            slots[i].in_use = true;
        }
        drop(slots); // allocate outside the lock
        PooledBuffer {
            pool: self.clone(),
            slot: empty,
            buffer: GrayImage::new(width, height),
        }
    }

    /// An empty descriptor set of the given row width, with room for about
    /// `rows` rows. Reuse requires an identical width and enough capacity.
    pub fn acquire_descriptors(&self, width: usize, rows: usize) -> PooledBuffer<DescriptorSet> {
        let mut slots = lock(&self.inner.descriptors);
        if let Some(i) = slots.iter().position(|s| {
            !s.in_use
                && s.buffer
                    .as_ref()
                    .is_some_and(|d| d.width() == width && d.capacity_bytes() >= width * rows)
        }) {
            let mut loaned = self.loan(&mut slots, i);
            drop(slots);
            loaned.reset(width);
            return loaned;
        }
        let empty = slots.iter().position(|s| !s.in_use && s.buffer.is_none());
        if let Some(i) = empty {
            slots[i].in_use = true;
        }
        drop(slots);
        PooledBuffer {
            pool: self.clone(),
            slot: empty,
            buffer: DescriptorSet::with_capacity(width, rows),
        }
    }

    /// An empty coordinate list. Point slots are shape-free; any idle
    /// buffer is reused with its allocation intact.
    pub fn acquire_points(&self) -> PooledBuffer<Vec<Point2<f32>>> {
        let mut slots = lock(&self.inner.points);
        if let Some(i) = slots.iter().position(|s| !s.in_use && s.buffer.is_some()) {
            let mut loaned = self.loan(&mut slots, i);
            loaned.clear();
            return loaned;
        }
        let empty = slots.iter().position(|s| !s.in_use && s.buffer.is_none());
        if let Some(i) = empty {
            slots[i].in_use = true;
        }
        PooledBuffer {
            pool: self.clone(),
            slot: empty,
            buffer: Vec::new(),
        }
    }

    /// Point-in-time occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        {
            let slots = lock(&self.inner.frames);
            stats.frames_free = slots.iter().filter(|s| !s.in_use).count();
            stats.frames_allocated = slots
                .iter()
                .filter(|s| s.in_use || s.buffer.is_some())
                .count();
            stats.resident_bytes += slots
                .iter()
                .filter_map(|s| s.buffer.as_ref())
                .map(|f| f.data.capacity())
                .sum::<usize>();
        }
        {
            let slots = lock(&self.inner.descriptors);
            stats.descriptors_free = slots.iter().filter(|s| !s.in_use).count();
            stats.descriptors_allocated = slots
                .iter()
                .filter(|s| s.in_use || s.buffer.is_some())
                .count();
            stats.resident_bytes += slots
                .iter()
                .filter_map(|s| s.buffer.as_ref())
                .map(|d| d.capacity_bytes())
                .sum::<usize>();
        }
        {
            let slots = lock(&self.inner.points);
            stats.points_free = slots.iter().filter(|s| !s.in_use).count();
            stats.points_allocated = slots
                .iter()
                .filter(|s| s.in_use || s.buffer.is_some())
                .count();
            stats.resident_bytes += slots
                .iter()
                .filter_map(|s| s.buffer.as_ref())
                .map(|p| p.capacity() * std::mem::size_of::<Point2<f32>>())
                .sum::<usize>();
        }
        stats
    }

    /// Drops every idle buffer. Capacities are kept; loaned slots are
    /// untouched and return their buffers normally on drop.
    pub fn clear(&self) {
        fn clear_shelf<T>(shelf: &Shelf<T>) {
            for slot in lock(shelf).iter_mut() {
                if !slot.in_use {
                    slot.buffer = None;
                }
            }
        }
        clear_shelf(&self.inner.frames);
        clear_shelf(&self.inner.descriptors);
        clear_shelf(&self.inner.points);
    }
}

/// Occupancy counts per pool plus the bytes idle buffers currently hold.
/// Loaned-out buffers are not counted in `resident_bytes`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub frames_allocated: usize,
    pub frames_free: usize,
    pub descriptors_allocated: usize,
    pub descriptors_free: usize,
    pub points_allocated: usize,
    pub points_free: usize,
    pub resident_bytes: usize,
}

/// A scoped buffer loan. Dereferences to the buffer; dropping returns the
/// slot to its pool on every exit path. Overflow loans (handed out past
/// pool capacity) have no slot and free their buffer on drop.
pub struct PooledBuffer<T: PoolItem> {
    pool: BufferPool,
    slot: Option<usize>,
    buffer: T,
}

impl<T: PoolItem> PooledBuffer<T> {
    /// False for overflow loans.
    #[inline]
    pub fn is_pooled(&self) -> bool {
        self.slot.is_some()
    }
}

impl<T: PoolItem> Deref for PooledBuffer<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.buffer
    }
}

impl<T: PoolItem> DerefMut for PooledBuffer<T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.buffer
    }
}

impl<T: PoolItem> Drop for PooledBuffer<T> {
    fn drop(&mut self) {
        let Some(index) = self.slot else {
            return; // overflow buffer, freed with the guard
        };
        let buffer = std::mem::take(&mut self.buffer);
        let mut slots = lock(T::shelf(&self.pool.inner));
        let slot = &mut slots[index];
        slot.buffer = Some(buffer);
        slot.in_use = false;
    }
}
