//! Path-length solvers.
//!
//! Each solver answers "how far along S must this particle travel" to reach
//! a point or to approach another particle most closely. The straight-line
//! forms are closed-form projections; the field-aware forms solve the
//! circular transverse motion for a field dominated by its y component,
//! which is the bending geometry of a fixed-target dipole.

use crate::core::types::ParticleState;
use crate::field::{FieldProvider, CLIGHT};

/// Path length to the point of closest approach to `xyz`, straight line.
pub fn ds_to_point_line(state: &ParticleState, xyz: &[f64; 3]) -> f64 {
    let p = &state.par;
    let mut p2 = p[3] * p[3] + p[4] * p[4] + p[5] * p[5];
    if p2 < 1.0e-4 {
        p2 = 1.0;
    }
    (p[3] * (xyz[0] - p[0]) + p[4] * (xyz[1] - p[1]) + p[5] * (xyz[2] - p[2])) / p2
}

/// Path length to the closest approach to `xyz` in a field with dominant
/// y component `by`.
///
/// The transverse motion lives in the x-z plane; the solver works in that
/// plane with the axis permutation (x, -z) and falls back to the
/// straight-line transverse projection when the curvature is negligible.
pub fn ds_to_point_field(state: &ParticleState, xyz: &[f64; 3], by: f64) -> f64 {
    let p = &state.par;
    let bq = by * state.charge as f64 * CLIGHT;
    let pt2 = p[3] * p[3] + p[5] * p[5];
    if pt2 < 1.0e-4 {
        return 0.0;
    }
    let dx = xyz[0] - p[0];
    let dy = -xyz[2] + p[2];
    let a = dx * p[3] - dy * p[5];
    if bq.abs() < 1.0e-8 {
        a / pt2
    } else {
        (bq * a).atan2(pt2 + bq * (dy * p[3] + dx * p[5])) / bq
    }
}

/// Path length to the closest approach to `xyz`, sampling the field at the
/// particle position. Neutral particles use the straight-line solution.
pub fn ds_to_point<F: FieldProvider>(state: &ParticleState, xyz: &[f64; 3], field: &F) -> f64 {
    let ds = ds_to_point_line(state, xyz);
    if state.charge == 0 {
        return ds;
    }
    let fld = field.field(&state.position());
    ds_to_point_field(state, xyz, fld[1])
}

/// Path lengths (s, s1) bringing two straight-line trajectories to their
/// mutual point of closest approach.
pub fn ds_to_particle_line(a: &ParticleState, b: &ParticleState) -> (f64, f64) {
    let p = &a.par;
    let q = &b.par;
    let p12 = p[3] * p[3] + p[4] * p[4] + p[5] * p[5];
    let p22 = q[3] * q[3] + q[4] * q[4] + q[5] * q[5];
    let p1p2 = p[3] * q[3] + p[4] * q[4] + p[5] * q[5];

    let drp1 = p[3] * (q[0] - p[0]) + p[4] * (q[1] - p[1]) + p[5] * (q[2] - p[2]);
    let drp2 = q[3] * (q[0] - p[0]) + q[4] * (q[1] - p[1]) + q[5] * (q[2] - p[2]);

    let mut detp = p1p2 * p1p2 - p12 * p22;
    if detp.abs() < 1.0e-4 {
        // near-parallel momenta, degenerate closest-approach system
        detp = 1.0;
    }
    (
        (drp2 * p1p2 - drp1 * p22) / detp,
        (drp2 * p12 - drp1 * p1p2) / detp,
    )
}

/// Path lengths (s, s1) of mutual closest approach for two particles in a
/// field with dominant y component `by`.
///
/// Solves the two transverse circles (axes permuted to put the bending in
/// the first two components); each circle pair yields two candidate root
/// pairs and the combination with the smallest 3D separation wins. Falls
/// back to `fallback` when `by` is exactly zero, where the circular system
/// is singular.
pub fn ds_to_particle_field(
    by: f64,
    a: &ParticleState,
    b: &ParticleState,
    fallback: (f64, f64),
) -> (f64, f64) {
    if by == 0.0 {
        return fallback;
    }

    let px = a.par[3];
    let py = -a.par[5];
    let pz = a.par[4];

    let px1 = b.par[3];
    let py1 = -b.par[5];
    let pz1 = b.par[4];

    let bq = by * a.charge as f64 * CLIGHT;
    let bq1 = by * b.charge as f64 * CLIGHT;

    let mut s = 0.0;
    let mut ds = 0.0;
    let mut s1 = 0.0;
    let mut ds1 = 0.0;

    if bq.abs() > 1.0e-8 || bq1.abs() > 1.0e-8 {
        let dx = b.par[0] - a.par[0];
        let dy = -b.par[2] + a.par[2];
        let d2 = dx * dx + dy * dy;

        let p2 = px * px + py * py;
        let p21 = px1 * px1 + py1 * py1;

        if p2.abs() < 1.0e-8 || p21.abs() < 1.0e-8 {
            return (0.0, 0.0);
        }

        let aa = px * py1 - py * px1;
        let bb = px * px1 + py * py1;

        let ldx = bq * bq1 * dx - bq1 * py + bq * py1;
        let ldy = bq * bq1 * dy + bq1 * px - bq * px1;
        let l2 = ldx * ldx + ldy * ldy;

        let c_s = bq1 * p2 + bq * bq1 * (dy * px - dx * py) - bq * bb;
        let c_s1 = bq * p21 - bq * bq1 * (dy * px1 - dx * py1) - bq1 * bb;

        let ca = bq * bq * bq1 * d2 + 2.0 * (c_s + bq * bq * (py1 * dx - px1 * dy));
        let ca1 = bq * bq1 * bq1 * d2 + 2.0 * (c_s1 - bq1 * bq1 * (py * dx - px * dy));

        let mut sa = 4.0 * l2 * p2 - ca * ca;
        let mut sa1 = 4.0 * l2 * p21 - ca1 * ca1;
        if sa < 0.0 {
            sa = 0.0;
        }
        if sa1 < 0.0 {
            sa1 = 0.0;
        }

        if bq.abs() > 1.0e-8 {
            s = (bq * (bq1 * (dx * px + dy * py) + aa)).atan2(c_s) / bq;
            ds = sa.sqrt().atan2(ca) / bq;
        } else {
            s = ((dx * px + dy * py) + (py * px1 - px * py1) / bq1) / p2;
            ds = s * s - (d2 - 2.0 * (px1 * dy - py1 * dx) / bq1) / p2;
            if ds < 0.0 {
                ds = 0.0;
            }
            ds = ds.sqrt();
        }

        if bq1.abs() > 1.0e-8 {
            s1 = (-bq1 * (bq * (dx * px1 + dy * py1) + aa)).atan2(c_s1) / bq1;
            ds1 = sa1.sqrt().atan2(ca1) / bq1;
        } else {
            s1 = (-(dx * px1 + dy * py1) + (py * px1 - px * py1) / bq) / p21;
            ds1 = s1 * s1 - (d2 + 2.0 * (px * dy - py * dx) / bq) / p21;
            if ds1 < 0.0 {
                ds1 = 0.0;
            }
            ds1 = ds1.sqrt();
        }
    }

    // Each trajectory has two candidate roots; evaluate all four pairings
    // in the permuted frame and keep the closest pair in 3D.
    let ss = [s + ds, s - ds];
    let ss1 = [s1 + ds1, s1 - ds1];
    let mut g = [[0.0; 5]; 2];
    let mut g1 = [[0.0; 5]; 2];

    for i in 0..2 {
        let bs = bq * ss[i];
        let c = bs.cos();
        let sn = bs.sin();
        let (s_b, c_b) = if bq.abs() > 1.0e-8 {
            (sn / bq, (1.0 - c) / bq)
        } else {
            let k = 1.0 / 6.0f64.sqrt();
            let s_b = (1.0 - bs * k) * (1.0 + bs * k) * ss[i];
            (s_b, 0.5 * s_b * bs)
        };
        g[i][0] = a.par[0] + s_b * px + c_b * py;
        g[i][1] = -a.par[2] - c_b * px + s_b * py;
        g[i][2] = a.par[1] + ss[i] * pz;
        g[i][3] = c * px + sn * py;
        g[i][4] = -sn * px + c * py;

        let bs = bq1 * ss1[i];
        let c = bs.cos();
        let sn = bs.sin();
        let (s_b, c_b) = if bq1.abs() > 1.0e-8 {
            (sn / bq1, (1.0 - c) / bq1)
        } else {
            let k = 1.0 / 6.0f64.sqrt();
            let s_b = (1.0 - bs * k) * (1.0 + bs * k) * ss1[i];
            (s_b, 0.5 * s_b * bs)
        };
        g1[i][0] = b.par[0] + s_b * px1 + c_b * py1;
        g1[i][1] = -b.par[2] - c_b * px1 + s_b * py1;
        g1[i][2] = b.par[1] + ss1[i] * pz1;
        g1[i][3] = c * px1 + sn * py1;
        g1[i][4] = -sn * px1 + c * py1;
    }

    let mut best = (0, 0);
    let mut d_min = 1.0e10;
    for j in 0..2 {
        for j1 in 0..2 {
            let xx = g[j][0] - g1[j1][0];
            let yy = g[j][1] - g1[j1][1];
            let zz = g[j][2] - g1[j1][2];
            let d = xx * xx + yy * yy + zz * zz;
            if d < d_min {
                d_min = d;
                best = (j, j1);
            }
        }
    }

    (ss[best.0], ss1[best.1])
}

/// Path lengths (s, s1) of mutual closest approach, sampling the field at
/// both particle positions. A neutral first particle, or a vanishing
/// average field, keeps the straight-line solution.
pub fn ds_to_particle<F: FieldProvider>(
    a: &ParticleState,
    b: &ParticleState,
    field: &F,
) -> (f64, f64) {
    let line = ds_to_particle_line(a, b);
    if a.charge == 0 {
        return line;
    }
    let f0 = field.field(&a.position());
    let f1 = field.field(&b.position());
    ds_to_particle_field(0.5 * (f0[1] + f1[1]), a, b, line)
}
