//! rxstore Reactive Layer
//!
//! Observable adapters over the callback-style data stack. Each operation
//! of [`ReactiveDataStack`] returns a cold [`Observable`] that starts the
//! engine call when first polled and terminates after exactly one engine
//! callback.

mod engine;
mod observable;
mod progress;
mod stack;
#[cfg(test)]
mod testing;

pub use engine::Engine;
pub use observable::{Disposable, Event, Observable, Observer, Subscription};
pub use progress::{StorageProgress, StorageProgressStreamExt};
pub use stack::{ReactiveDataStack, UniqueMapping};
