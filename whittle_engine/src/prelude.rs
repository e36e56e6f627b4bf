pub use anyhow::{anyhow, bail, Context, Result};

pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};

pub use itertools::Itertools;
pub use std::collections::{HashMap, HashSet};

pub use crate::mesh::halfedge;
pub use crate::mesh::halfedge::*;

pub use whittle_commons::math::*;
pub use whittle_commons::utils::*;
