#![allow(dead_code)]

pub(crate) mod cluster;

pub(crate) mod logging;

pub(crate) mod model;

pub(crate) mod network;
