mod adaptivity;
mod residual;
