mod dae;
mod dofs;
mod kelly;
mod mesh;
mod transfer;
