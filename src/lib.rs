// Index Strength Engine
// Tick-driven option trading core: bars, VWAP, basket strength, signals, positions, risk

pub mod core;
pub mod layer1;
pub mod layer2;
pub mod layer3;
pub mod layer4;
