use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::count::Count;
use crate::lm_state::{invalid_data, FloatLmState, GeneralLmState};

/// A [`FloatLmState`] paired with derivatives of the objective function
/// w.r.t. its `discount` and counts.
///
/// `total` is a derived quantity (`discount` plus the sum of the counts), so
/// its derivative is never stored: before writing, `total_deriv` is folded
/// into `discount_deriv` and every count derivative, then zeroed.  This lazy
/// total gradient is what makes the on-disk derivative format canonical.
#[derive(Debug, Clone, Default)]
pub struct FloatLmStateDerivs {
    pub state: FloatLmState,
    pub total_deriv: f64,
    pub discount_deriv: f64,
    pub count_derivs: Vec<f64>,
}

impl FloatLmStateDerivs {
    /// Reads the underlying counts and sizes the derivatives to match,
    /// zeroed.  Derivatives themselves are read separately by
    /// [`read_derivs`](Self::read_derivs).
    pub fn read<R: Read>(reader: &mut R) -> io::Result<FloatLmStateDerivs> {
        let state = FloatLmState::read(reader)?;
        let num_counts = state.counts.len();
        Ok(FloatLmStateDerivs {
            state,
            total_deriv: 0.0,
            discount_deriv: 0.0,
            count_derivs: vec![0.0; num_counts],
        })
    }

    /// Reads the body-only derivative record.  The stored count length is a
    /// verification field and must match the already-read base record.
    pub fn read_derivs<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        self.total_deriv = 0.0;
        self.discount_deriv = reader.read_f64::<LittleEndian>()?;
        let count_size = reader.read_i32::<LittleEndian>()?;
        if count_size != self.state.counts.len() as i32 {
            return Err(invalid_data(format!(
                "count size mismatch: expected {}, got {} reading float-count derivs (wrong file?)",
                self.state.counts.len(),
                count_size
            )));
        }
        self.count_derivs.resize(count_size as usize, 0.0);
        for deriv in self.count_derivs.iter_mut() {
            *deriv = reader.read_f64::<LittleEndian>()?;
        }
        Ok(())
    }

    /// Reads a derivative record and adds it to the derivatives held here.
    pub fn read_derivs_adding<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        let discount_deriv = reader.read_f64::<LittleEndian>()?;
        let count_size = reader.read_i32::<LittleEndian>()?;
        if count_size != self.state.counts.len() as i32 {
            return Err(invalid_data(format!(
                "count size mismatch: expected {}, got {} reading float-count derivs (wrong file?)",
                self.state.counts.len(),
                count_size
            )));
        }
        self.discount_deriv += discount_deriv;
        for deriv in self.count_derivs.iter_mut() {
            *deriv += reader.read_f64::<LittleEndian>()?;
        }
        Ok(())
    }

    /// Writes the derivative record, first distributing `total_deriv` into
    /// the discount and count derivatives (`total = discount + Σ counts`).
    pub fn write_derivs<W: Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.backprop_from_total_deriv();
        assert_eq!(self.count_derivs.len(), self.state.counts.len());
        writer.write_f64::<LittleEndian>(self.discount_deriv)?;
        writer.write_i32::<LittleEndian>(self.count_derivs.len() as i32)?;
        for &deriv in &self.count_derivs {
            writer.write_f64::<LittleEndian>(deriv)?;
        }
        Ok(())
    }

    fn backprop_from_total_deriv(&mut self) {
        if self.total_deriv == 0.0 {
            return;
        }
        self.discount_deriv += self.total_deriv;
        for deriv in self.count_derivs.iter_mut() {
            *deriv += self.total_deriv;
        }
        self.total_deriv = 0.0;
    }

    pub fn print<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        assert_eq!(self.state.counts.len(), self.count_derivs.len());
        write!(writer, " [ ")?;
        for &h in &self.state.history {
            write!(writer, "{} ", h)?;
        }
        write!(
            writer,
            "]: total={},d={} discount={},d={} ",
            self.state.total, self.total_deriv, self.state.discount, self.discount_deriv
        )?;
        for (&(word, count), &deriv) in self.state.counts.iter().zip(&self.count_derivs) {
            write!(writer, "{}->{},d={} ", word, count, deriv)?;
        }
        writeln!(writer)
    }
}

/// A [`GeneralLmState`] paired with `Count`-valued derivatives of the
/// objective function w.r.t. each count, plus the derivative w.r.t. the
/// state's `discount` (nonzero only when min-counts were applied upstream).
#[derive(Debug, Clone, Default)]
pub struct GeneralLmStateDerivs {
    pub state: GeneralLmState,
    pub discount_deriv: f32,
    pub count_derivs: Vec<Count>,
}

impl GeneralLmStateDerivs {
    pub fn read<R: Read>(reader: &mut R) -> io::Result<GeneralLmStateDerivs> {
        let state = GeneralLmState::read(reader)?;
        let num_counts = state.counts.len();
        Ok(GeneralLmStateDerivs {
            state,
            discount_deriv: 0.0,
            count_derivs: vec![Count::zero(); num_counts],
        })
    }

    pub fn read_derivs<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        let count_size = reader.read_i32::<LittleEndian>()?;
        if count_size != self.state.counts.len() as i32 {
            return Err(invalid_data(format!(
                "count size mismatch: expected {}, got {} reading count derivs (wrong file?)",
                self.state.counts.len(),
                count_size
            )));
        }
        self.count_derivs.clear();
        for _ in 0..count_size {
            self.count_derivs.push(Count::read(reader)?);
        }
        Ok(())
    }

    pub fn read_derivs_adding<R: Read>(&mut self, reader: &mut R) -> io::Result<()> {
        let count_size = reader.read_i32::<LittleEndian>()?;
        if count_size != self.state.counts.len() as i32 {
            return Err(invalid_data(format!(
                "count size mismatch: expected {}, got {} reading count derivs (wrong file?)",
                self.state.counts.len(),
                count_size
            )));
        }
        for deriv in self.count_derivs.iter_mut() {
            let other = Count::read(reader)?;
            deriv.total += other.total;
            deriv.top1 += other.top1;
            deriv.top2 += other.top2;
            deriv.top3 += other.top3;
        }
        Ok(())
    }

    pub fn write_derivs<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        assert_eq!(self.count_derivs.len(), self.state.counts.len());
        writer.write_i32::<LittleEndian>(self.count_derivs.len() as i32)?;
        for deriv in &self.count_derivs {
            deriv.write(writer)?;
        }
        Ok(())
    }

    pub fn print<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        write!(writer, " [ ")?;
        for &h in &self.state.history {
            write!(writer, "{} ", h)?;
        }
        write!(writer, "]: ")?;
        for (&(word, ref count), deriv) in self.state.counts.iter().zip(&self.count_derivs) {
            write!(writer, "{}->{},d={} ", word, count, deriv)?;
        }
        writeln!(writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_state() -> FloatLmState {
        FloatLmState {
            history: vec![11],
            total: 1.0,
            discount: 0.75,
            counts: vec![(12, 0.15), (13, 0.1)],
        }
    }

    #[test]
    fn total_deriv_never_reaches_disk() {
        let mut derivs = FloatLmStateDerivs {
            state: sample_state(),
            total_deriv: 2.0,
            discount_deriv: 1.0,
            count_derivs: vec![0.5, -0.5],
        };
        let mut buf = Vec::new();
        derivs.write_derivs(&mut buf).unwrap();
        assert_eq!(derivs.total_deriv, 0.0);

        let mut read_back = FloatLmStateDerivs {
            state: sample_state(),
            ..Default::default()
        };
        read_back.count_derivs = vec![0.0; 2];
        read_back.read_derivs(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(read_back.total_deriv, 0.0);
        assert_eq!(read_back.discount_deriv, 3.0);
        assert_eq!(read_back.count_derivs, vec![2.5, 1.5]);
    }

    #[test]
    fn mismatched_deriv_length_is_rejected() {
        let mut derivs = FloatLmStateDerivs {
            state: sample_state(),
            total_deriv: 0.0,
            discount_deriv: 0.0,
            count_derivs: vec![0.0, 0.0],
        };
        let mut buf = Vec::new();
        derivs.write_derivs(&mut buf).unwrap();

        let mut short_state = sample_state();
        short_state.counts.pop();
        let mut read_back = FloatLmStateDerivs {
            state: short_state,
            ..Default::default()
        };
        assert!(read_back.read_derivs(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn general_derivs_round_trip_and_sum() {
        let state = GeneralLmState {
            history: vec![13],
            discount: 0.0,
            counts: vec![(2, Count::new(0.4)), (14, Count::new(0.4))],
        };
        let derivs = GeneralLmStateDerivs {
            state: state.clone(),
            discount_deriv: 0.0,
            count_derivs: vec![
                Count {
                    total: 0.5,
                    top1: 0.25,
                    top2: 0.0,
                    top3: 0.0,
                },
                Count::zero(),
            ],
        };
        let mut buf = Vec::new();
        derivs.write_derivs(&mut buf).unwrap();

        let mut read_back = GeneralLmStateDerivs {
            state,
            discount_deriv: 0.0,
            count_derivs: vec![Count::zero(); 2],
        };
        read_back.read_derivs(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(read_back.count_derivs[0].total, 0.5);

        read_back.read_derivs_adding(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(read_back.count_derivs[0].total, 1.0);
        assert_eq!(read_back.count_derivs[0].top1, 0.5);
    }
}
