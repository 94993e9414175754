// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#[derive(Debug, Default, Copy, Clone, Hash, Eq, PartialEq)]
pub struct Point<T> {
    pub x: T,
    pub y: T,
}

impl<T> From<(T, T)> for Point<T> {
    fn from((x, y): (T, T)) -> Self {
        Self { x, y }
    }
}

#[derive(Debug, Default, Copy, Clone, Hash, Eq, PartialEq)]
pub struct Size<T> {
    pub w: T,
    pub h: T,
}

impl<T> From<(T, T)> for Size<T> {
    fn from((w, h): (T, T)) -> Self {
        Self { w, h }
    }
}

#[derive(Debug, Default, Copy, Clone, Hash, Eq, PartialEq)]
pub struct Rectangle<T> {
    pub loc: Point<T>,
    pub size: Size<T>,
}

impl<T> Rectangle<T> {
    pub fn new(x: T, y: T, w: T, h: T) -> Self {
        Self {
            loc: Point { x, y },
            size: Size { w, h },
        }
    }
}

impl Rectangle<i32> {
    pub fn right(&self) -> i32 {
        self.loc.x + self.size.w
    }

    pub fn bottom(&self) -> i32 {
        self.loc.y + self.size.h
    }

    pub fn contains(&self, p: Point<i32>) -> bool {
        p.x >= self.loc.x && p.x < self.right() && p.y >= self.loc.y && p.y < self.bottom()
    }

    /// Clamps `self` so it lies within `bounds` where possible, preserving
    /// size. Used by the popup constraint solver's slide adjustment.
    pub fn slide_into(&self, bounds: &Rectangle<i32>) -> Self {
        let mut out = *self;
        if out.right() > bounds.right() {
            out.loc.x = bounds.right() - out.size.w;
        }
        if out.loc.x < bounds.loc.x {
            out.loc.x = bounds.loc.x;
        }
        if out.bottom() > bounds.bottom() {
            out.loc.y = bounds.bottom() - out.size.h;
        }
        if out.loc.y < bounds.loc.y {
            out.loc.y = bounds.loc.y;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contains_excludes_far_edges() {
        let r = Rectangle::new(10, 10, 5, 5);
        assert!(r.contains((10, 10).into()));
        assert!(r.contains((14, 14).into()));
        assert!(!r.contains((15, 10).into()));
        assert!(!r.contains((9, 10).into()));
    }

    #[test]
    fn slide_into_keeps_size() {
        let bounds = Rectangle::new(0, 0, 100, 100);
        let r = Rectangle::new(90, -5, 20, 20);
        let slid = r.slide_into(&bounds);
        assert_eq!(slid, Rectangle::new(80, 0, 20, 20));
    }
}
