//! Demo components.

use glam::{Quat, Vec3};
use weft_core::define_component;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position(pub Vec3);
define_component!(Position, 1, "Position");

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Velocity(pub Vec3);
define_component!(Velocity, 2, "Velocity");

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Rotation(pub Quat);
define_component!(Rotation, 3, "Rotation");

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Health(pub u32);
define_component!(Health, 4, "Health");

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mana(pub u32);
define_component!(Mana, 5, "Mana");

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Scale(pub Vec3);
define_component!(Scale, 6, "Scale");
