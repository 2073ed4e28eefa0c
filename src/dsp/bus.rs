//! Bus router — the Main bus plus auxiliary buses, summed on write.

use crate::plugin::{AUX_BUS_COUNT, BusIndex};

const BUS_COUNT: usize = 1 + AUX_BUS_COUNT as usize;

/// Block-sized signal accumulators in channel-segment layout.
#[derive(Debug, Clone)]
pub struct BusRouter {
    buses: [Vec<f32>; BUS_COUNT],
    channels: usize,
    block_size: usize,
}

impl Default for BusRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl BusRouter {
    pub fn new() -> Self {
        Self {
            buses: Default::default(),
            channels: 0,
            block_size: 0,
        }
    }

    /// Preallocate for blocks of `channels * block_size` samples.
    pub fn allocate(&mut self, channels: usize, block_size: usize) {
        self.channels = channels;
        self.block_size = block_size;
        for bus in &mut self.buses {
            bus.clear();
            bus.resize(channels * block_size, 0.0);
        }
    }

    /// Start a block: Main holds the input, every auxiliary bus is zeroed.
    pub fn begin_block(&mut self, input: &[f32], channels: usize, block_size: usize) {
        let len = channels * block_size;
        if self.channels != channels || self.block_size != block_size {
            self.channels = channels;
            self.block_size = block_size;
            for bus in &mut self.buses {
                bus.resize(len, 0.0);
            }
        }
        let (main, aux) = self.buses.split_at_mut(1);
        main[0].copy_from_slice(&input[..len]);
        for bus in aux {
            bus.fill(0.0);
        }
    }

    /// Copy the current content of `bus` into `out`.
    pub fn read_into(&self, bus: BusIndex, out: &mut [f32]) {
        out.copy_from_slice(&self.buses[bus.index()]);
    }

    /// Write a plugin result. `replace` overwrites the bus (serial chaining
    /// on the bus that was read); otherwise the result is summed in.
    pub fn write(&mut self, bus: BusIndex, data: &[f32], replace: bool) {
        let target = &mut self.buses[bus.index()];
        if replace {
            target.copy_from_slice(data);
        } else {
            for (t, &s) in target.iter_mut().zip(data) {
                *t += s;
            }
        }
    }

    pub fn bus(&self, bus: BusIndex) -> &[f32] {
        &self.buses[bus.index()]
    }

    pub fn main(&self) -> &[f32] {
        &self.buses[0]
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }
}
