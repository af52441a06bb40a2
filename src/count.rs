use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

/// A count that remembers the three largest individual contributions to its
/// sum.  You can think of it as an 'extended' float: in addition to the total
/// of a bag of non-negative pieces, it tracks the largest piece (`top1`) and
/// the two runners-up.  Keeping the top pieces exact is what makes
/// modified-Kneser-Ney style discounting meaningful when the pieces are
/// weighted mixtures rather than raw occurrence counts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Count {
    pub total: f32,
    pub top1: f32,
    pub top2: f32,
    pub top3: f32,
}

impl Count {
    /// A count consisting of a single piece of value `f`.
    pub fn new(f: f32) -> Count {
        assert!(f >= 0.0);
        Count {
            total: f,
            top1: f,
            top2: 0.0,
            top3: 0.0,
        }
    }

    /// A count consisting of `num_pieces` identical pieces of value `scale`.
    pub fn from_pieces(scale: f32, num_pieces: i32) -> Count {
        assert!(num_pieces >= 1);
        Count {
            total: scale * num_pieces as f32,
            top1: scale,
            top2: if num_pieces >= 2 { scale } else { 0.0 },
            top3: if num_pieces >= 3 { scale } else { 0.0 },
        }
    }

    pub fn zero() -> Count {
        Count {
            total: 0.0,
            top1: 0.0,
            top2: 0.0,
            top3: 0.0,
        }
    }

    /// Adds another count, merging the top-3 pieces of both sides.
    pub fn add(&mut self, other: &Count) {
        self.total += other.total;
        if other.top1 > self.top1 {
            let f = self.top1;
            let g = self.top2; // needed in either branch below.
            self.top1 = other.top1;
            if f > other.top2 {
                self.top2 = f;
                if g > other.top2 {
                    // g is the old top2, so it must be >= top3.
                    self.top3 = g;
                } else {
                    // other.top2 > g > old top2 > top3
                    self.top3 = other.top2;
                }
            } else {
                self.top2 = other.top2;
                if f > other.top3 {
                    self.top3 = f;
                } else {
                    self.top3 = other.top3;
                }
            }
        } else if other.top1 > self.top2 {
            let f = self.top2;
            self.top2 = other.top1;
            if other.top2 > f {
                self.top3 = other.top2;
            } else {
                self.top3 = f;
            }
        } else if other.top1 > self.top3 {
            self.top3 = other.top1;
        }
    }

    /// Adds a single piece of value `f`; gives identical results to
    /// `add(&Count::new(f))`, just cheaper.
    pub fn add_float(&mut self, f: f32) {
        assert!(f >= 0.0);
        self.total += f;
        let mut f = f;
        if f > self.top1 {
            std::mem::swap(&mut self.top1, &mut f);
        }
        if f > self.top2 {
            std::mem::swap(&mut self.top2, &mut f);
        }
        if f > self.top3 {
            self.top3 = f;
        }
    }

    /// Adds `num_pieces` identical pieces of value `scale`.
    pub fn add_pieces(&mut self, scale: f32, num_pieces: i32) {
        if num_pieces == 1 {
            self.add_float(scale);
        } else {
            assert!(num_pieces > 0, "adding zero count");
            self.total += num_pieces as f32 * scale;
            if scale >= self.top1 {
                self.top3 = if num_pieces > 2 { scale } else { self.top1 };
                self.top1 = scale;
                self.top2 = scale;
            } else if scale >= self.top2 {
                self.top2 = scale;
                self.top3 = scale;
            } else if scale >= self.top3 {
                self.top3 = scale;
            }
        }
    }

    /// Reverse-mode differentiation of `add`.  Suppose the forward pass
    /// summed contributions c1..cn into `self`, and `self_deriv` is the
    /// derivative of the objective w.r.t. the sum.  Calling this once per
    /// contribution accumulates the derivative w.r.t. that contribution into
    /// `other_deriv`.
    ///
    /// The `total` component always flows through; each top slot's derivative
    /// flows to a contribution iff the contribution's piece equals that slot's
    /// value in the sum, and at most once: the first match consumes the slot
    /// by zeroing it in `self_deriv`, so tied pieces are never double-counted
    /// (this makes the result a subgradient).  After all contributions are
    /// processed, the top1..top3 of `self_deriv` must be zero wherever the
    /// corresponding value is nonzero.
    pub fn add_backward(&self, other: &Count, self_deriv: &mut Count, other_deriv: &mut Count) {
        self.check();
        other.check();

        other_deriv.total += self_deriv.total;

        // A tighter implementation could exploit the sortedness to skip some
        // of the 9 comparisons, but it was complex and hard to verify; this
        // path is not hot enough to matter.
        add_backward_piece(self, other.top1, self_deriv, &mut other_deriv.top1);
        add_backward_piece(self, other.top2, self_deriv, &mut other_deriv.top2);
        add_backward_piece(self, other.top3, self_deriv, &mut other_deriv.top3);
    }

    /// Backward counterpart of `add_float`.
    pub fn add_float_backward(&self, f: f32, self_deriv: &mut Count, f_deriv: &mut f32) {
        *f_deriv += self_deriv.total;
        add_backward_piece(self, f, self_deriv, f_deriv);
    }

    /// Backward counterpart of `add_pieces`: the derivative w.r.t. `scale`
    /// (accumulated into `scale_deriv`, which is f64 because the callers
    /// accumulate over whole streams) gets `num_pieces` times the total
    /// derivative, plus the derivative of each top slot one of the pieces
    /// landed in.
    pub fn add_pieces_backward(
        &self,
        scale: f32,
        num_pieces: i32,
        self_deriv: &mut Count,
        scale_deriv: &mut f64,
    ) {
        let mut f_deriv: f32 = 0.0;
        f_deriv += self_deriv.total * num_pieces as f32;
        let matches = num_pieces.min(3);
        for _ in 0..matches {
            add_backward_piece(self, scale, self_deriv, &mut f_deriv);
        }
        *scale_deriv += f_deriv as f64;
    }

    /// `total*total' + top1*top1' + top2*top2' + top3*top3'` — the inner
    /// product that makes `Count` a vector space for finite-difference tests.
    pub fn dot(&self, other: &Count) -> f32 {
        self.total * other.total
            + self.top1 * other.top1
            + self.top2 * other.top2
            + self.top3 * other.top3
    }

    /// Asserts the well-formedness invariants.  Do not apply this to counts
    /// that represent derivatives.
    pub fn check(&self) {
        assert!(self.total >= 0.99 * (self.top1 + self.top2 + self.top3));
        assert!(self.top1 >= self.top2);
        assert!(self.top2 >= self.top3);
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        writer.write_f32::<LittleEndian>(self.total)?;
        writer.write_f32::<LittleEndian>(self.top1)?;
        writer.write_f32::<LittleEndian>(self.top2)?;
        writer.write_f32::<LittleEndian>(self.top3)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: &mut R) -> io::Result<Count> {
        Ok(Count {
            total: reader.read_f32::<LittleEndian>()?,
            top1: reader.read_f32::<LittleEndian>()?,
            top2: reader.read_f32::<LittleEndian>()?,
            top3: reader.read_f32::<LittleEndian>()?,
        })
    }
}

fn add_backward_piece(sum: &Count, f: f32, sum_deriv: &mut Count, f_deriv: &mut f32) {
    if f == sum.top1 && sum_deriv.top1 != 0.0 {
        *f_deriv += sum_deriv.top1;
        sum_deriv.top1 = 0.0;
    } else if f == sum.top2 && sum_deriv.top2 != 0.0 {
        *f_deriv += sum_deriv.top2;
        sum_deriv.top2 = 0.0;
    } else if f == sum.top3 && sum_deriv.top3 != 0.0 {
        *f_deriv += sum_deriv.top3;
        sum_deriv.top3 = 0.0;
    }
}

impl fmt::Display for Count {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{}", self.total, self.top1)?;
        if self.top2 != 0.0 {
            write!(f, ",{}", self.top2)?;
        }
        if self.top3 != 0.0 {
            write!(f, ",{}", self.top3)?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::BTreeSet;

    fn rand_uniform(rng: &mut StdRng) -> f32 {
        rng.gen_range(0..1000) as f32 / 1000.0
    }

    fn approx_equal(a: f32, b: f32, delta: f32) -> bool {
        (a - b).abs() <= delta * a.abs().max(b.abs())
    }

    #[test]
    fn add_tracks_top_three() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let num_elements = rng.gen_range(0..10);
            let mut sum1 = Count::zero();
            let mut sum2 = Count::zero();
            let mut vec = Vec::new();
            for _ in 0..num_elements {
                let f = rand_uniform(&mut rng);
                vec.push(f);
                let target = if rng.gen_range(0..2) == 0 {
                    &mut sum1
                } else {
                    &mut sum2
                };
                if rng.gen_range(0..2) == 0 {
                    target.add(&Count::new(f));
                } else {
                    target.add_float(f);
                }
                if rng.gen_range(0..3) == 0 {
                    sum1.add(&sum2);
                    sum2 = Count::zero();
                }
            }
            sum1.add(&sum2);

            let total: f32 = vec.iter().sum();
            assert!(approx_equal(total, sum1.total, 1.0e-4) || total == sum1.total);
            vec.sort_by(|a, b| b.partial_cmp(a).unwrap());
            vec.push(0.0);
            vec.push(0.0);
            vec.push(0.0);
            assert_eq!(sum1.top1, vec[0]);
            assert_eq!(sum1.top2, vec[1]);
            assert_eq!(sum1.top3, vec[2]);
            sum1.check();
        }
    }

    #[test]
    fn from_pieces_matches_repeated_add() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let scale = rand_uniform(&mut rng);
            let num_pieces = rng.gen_range(1..6);
            let bulk = Count::from_pieces(scale, num_pieces);
            let mut slow = Count::zero();
            for _ in 0..num_pieces {
                slow.add_float(scale);
            }
            assert_eq!(bulk.top1, slow.top1);
            assert_eq!(bulk.top2, slow.top2);
            assert_eq!(bulk.top3, slow.top3);
            assert!(approx_equal(bulk.total, slow.total, 1.0e-5) || bulk.total == slow.total);
        }
    }

    // Accumulates a sum and a sum of slightly perturbed values, and checks
    // that the analytic derivatives predict the objective change.
    #[test]
    fn add_backward_matches_finite_difference() {
        let mut rng = StdRng::seed_from_u64(13);
        for _ in 0..100 {
            // distinct piece values, so ties between different pieces cannot
            // occur (the tie policy is a subgradient and would not match the
            // finite difference).
            let mut seen_before = BTreeSet::new();

            let num_counts = rng.gen_range(0..6);
            let mut counts = vec![Count::zero(); num_counts];
            let mut counts_perturbed = vec![Count::zero(); num_counts];
            let mut derivs = vec![Count::zero(); num_counts];

            let mut total_count = Count::zero();
            let mut total_count_perturbed = Count::zero();

            let delta = 1.0e-3f32;

            for i in 0..num_counts {
                let num_elements = rng.gen_range(0..4);
                for _ in 0..num_elements {
                    let f = loop {
                        let f = rand_uniform(&mut rng);
                        let key = (f * 1000.0) as i64;
                        if seen_before.insert(key) {
                            break f;
                        }
                    };
                    let f_perturbed = f + (rand_uniform(&mut rng) - 0.5) * delta;
                    counts[i].add_float(f);
                    counts_perturbed[i].add_float(f_perturbed);
                }
                total_count.add(&counts[i]);
                total_count_perturbed.add(&counts_perturbed[i]);
            }

            // a random linear objective on the summed count.
            let mut total_deriv = Count {
                total: rand_uniform(&mut rng) - 0.5,
                top1: rand_uniform(&mut rng) - 0.5,
                top2: rand_uniform(&mut rng) - 0.5,
                top3: rand_uniform(&mut rng) - 0.5,
            };

            let objf = total_count.dot(&total_deriv);
            let objf_perturbed = total_count_perturbed.dot(&total_deriv);
            let objf_delta = objf_perturbed - objf;

            let mut objf_delta_check = 0.0;
            for i in 0..num_counts {
                total_count.add_backward(&counts[i], &mut total_deriv, &mut derivs[i]);
                objf_delta_check +=
                    derivs[i].dot(&counts_perturbed[i]) - derivs[i].dot(&counts[i]);
            }
            assert!(
                approx_equal(objf_delta, objf_delta_check, 0.01)
                    || (objf_delta.abs() < 1.0e-6 && objf_delta_check.abs() < 1.0e-6),
                "objf_delta = {} vs check = {}",
                objf_delta,
                objf_delta_check
            );
        }
    }

    #[test]
    fn add_pieces_backward_matches_float_backward() {
        let mut rng = StdRng::seed_from_u64(17);
        for _ in 0..100 {
            let scale = rand_uniform(&mut rng) + 0.001;
            let num_pieces = rng.gen_range(1..5);
            let mut sum = Count::new(rand_uniform(&mut rng));
            sum.add_pieces(scale, num_pieces);

            let deriv_template = Count {
                total: rand_uniform(&mut rng) - 0.5,
                top1: rand_uniform(&mut rng) - 0.5,
                top2: rand_uniform(&mut rng) - 0.5,
                top3: rand_uniform(&mut rng) - 0.5,
            };

            let mut deriv1 = deriv_template;
            let mut scale_deriv = 0.0f64;
            sum.add_pieces_backward(scale, num_pieces, &mut deriv1, &mut scale_deriv);

            let mut deriv2 = deriv_template;
            let mut check = 0.0f32;
            for _ in 0..num_pieces {
                sum.add_float_backward(scale, &mut deriv2, &mut check);
            }
            assert!(
                (scale_deriv - check as f64).abs() <= 1.0e-5 * check.abs() as f64 + 1.0e-7,
                "{} vs {}",
                scale_deriv,
                check
            );
        }
    }

    #[test]
    fn round_trip() {
        let mut buf = Vec::new();
        let count = Count {
            total: 2.5,
            top1: 1.0,
            top2: 1.0,
            top3: 0.5,
        };
        count.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 16);
        let read_back = Count::read(&mut io::Cursor::new(buf)).unwrap();
        assert_eq!(count, read_back);
    }
}
