// uDashBoard: featherweight dashboard application.
//
// Copyright (C) 2019  Brandon Lewis
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Lesser General Public License
// as published by the Free Software Foundation, either version 3 of
// the License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Lesser General Public License for more details.
//
// You should have received a copy of the GNU Lesser General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

// This model does not run on continuous/wall time -- it runs in
// integer cycles, and "clock time" is just a monotonic accumulator
// that expressions advance explicitly via WAIT and WAIT_UNTIL. So
// this keeps a tiny struct owning one piece of mutable state, like a
// wall-clock wrapper would, but the state is a logical f64 rather
// than a system timer.

#[derive(Clone, Debug)]
pub struct Clock {
    seconds: f64,
}

impl Clock {
    pub fn new() -> Clock {
        Clock { seconds: 0.0 }
    }

    pub fn seconds(&self) -> f64 {
        self.seconds
    }

    /// WAIT(dt): advance the clock by `dt` if non-negative, otherwise
    /// leave it unchanged. Returns the new clock value.
    pub fn wait(&mut self, dt: f64) -> f64 {
        if dt >= 0.0 {
            self.seconds += dt;
        }
        self.seconds
    }

    /// WAIT_UNTIL(target): set the clock to `max(target, current)`.
    /// Returns the new clock value.
    pub fn wait_until(&mut self, target: f64) -> f64 {
        self.seconds = self.seconds.max(target);
        self.seconds
    }

    pub fn reset(&mut self) {
        self.seconds = 0.0;
    }
}

impl Default for Clock {
    fn default() -> Clock {
        Clock::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_ignores_negative_delta() {
        let mut c = Clock::new();
        assert_eq!(c.wait(5.0), 5.0);
        assert_eq!(c.wait(-1.0), 5.0);
    }

    #[test]
    fn wait_until_never_moves_backward() {
        let mut c = Clock::new();
        c.wait(10.0);
        assert_eq!(c.wait_until(4.0), 10.0);
        assert_eq!(c.wait_until(20.0), 20.0);
    }
}
