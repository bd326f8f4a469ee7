//! Test-only flux back-end: replays a `tbuf`-produced cell buffer as flux
//! intervals, so a handler's `read_raw` output can be fed straight back
//! through `write_raw` inside a unit test without a captured flux file.

use crate::error::FluxError;
use crate::flux::source::{FluxSample, FluxSource};
use bit_vec::BitVec;

pub struct CellFlux {
    cells: BitVec,
    clk_ns: f64,
    pos: usize,
    revolutions_left: u32,
}

impl CellFlux {
    pub fn new(cells: BitVec, clk_ns: f64) -> Self {
        CellFlux { cells, clk_ns, pos: 0, revolutions_left: 5 }
    }
}

impl FluxSource for CellFlux {
    fn reset(&mut self, _tracknr: u32) -> Result<(), FluxError> {
        self.pos = 0;
        self.revolutions_left = 5;
        Ok(())
    }

    fn next_flux(&mut self) -> Option<FluxSample> {
        if self.cells.is_empty() || self.revolutions_left == 0 {
            return None;
        }

        let index = self.pos == 0;
        if index {
            self.revolutions_left -= 1;
        }

        // Accumulate cells (zero-cells plus the terminating one-cell) into a
        // single flux interval, matching how a real drive only produces a
        // transition on a one-bit.
        let mut n_cells = 0u32;
        loop {
            let bit = self.cells[self.pos];
            self.pos = (self.pos + 1) % self.cells.len();
            n_cells += 1;
            if bit {
                break;
            }
            if self.pos == 0 {
                break;
            }
        }

        Some(FluxSample { interval_ps: (n_cells as f64 * self.clk_ns * 1000.0) as u32, index })
    }

    fn nominal_cell_ns(&self) -> f64 {
        self.clk_ns
    }
}
