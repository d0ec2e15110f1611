// SPDX-License-Identifier: Apache-2.0

mod buffer_pool;
mod finder;
mod fingerprint;
mod reader;
mod split;

pub use buffer_pool::{BufferPool, DEFAULT_BUFFER_SIZE, PooledBuffer};
#[cfg(test)]
pub use finder::MockFileFinder;
pub use finder::{FileFinder, GlobFileFinder};
pub use fingerprint::{Fingerprint, prefix_match};
pub use reader::{FileReader, OpenFileGuard, OpenFiles, ReadOutcome, ReadTask};
pub use split::{DelimiterSplitter, LineSplitter, Records, Splitter, Token};
