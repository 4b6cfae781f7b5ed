//! Exclusion bitmaps for filtered vector search.
//!
//! A set bit means "exclude this candidate". [`BitsetView`] borrows bytes
//! owned by the caller; [`FilterBitmap`] owns its storage and hands out views.
//!
//! A view over `n` bits needs at least `ceil(n / 8)` bytes.
//! [`BitsetView::new`] panics on a shorter buffer and [`BitsetView::try_new`]
//! returns `None`.

pub mod bitmap;
pub mod view;

pub use bitmap::FilterBitmap;
pub use view::BitsetView;
