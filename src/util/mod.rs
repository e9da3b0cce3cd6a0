pub mod aligned;
pub mod dna;
