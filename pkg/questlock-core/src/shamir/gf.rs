/*
 * questlock: threshold-split credentials released through real-world quests
 * Copyright (C) 2018-2022 Aleksa Sarai <cyphar@cyphar.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use std::ops::{Add, AddAssign, Div, DivAssign, Mul, MulAssign, Neg, Sub, SubAssign};

use rand::{CryptoRng, RngCore};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("[critical security issue] all points must have an invertible (non-zero) x value")]
    NonInvertiblePoint,

    #[error("[critical security issue] interpolation points must have distinct x values")]
    RepeatedPoint,
}

/// Primitive uint type for GfElems.
pub type GfElemPrimitive = u8;

/// A field element of `GF(2^8)`, with characteristic polynomial
/// `x^8 + x^4 + x^3 + x + 1` (the Rijndael polynomial).
///
/// Multiplication and inversion are branch-free with respect to the values
/// being operated on, so secret bytes flowing through the field do not
/// influence control flow.
// NOTE: PartialEq is not timing-safe.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GfElem(GfElemPrimitive);

impl GfElem {
    // x^8 + x^4 + x^3 + x^1 + 1, with the x^8 term dropped.
    const TRUNC_POLYNOMIAL: GfElemPrimitive = 0b0001_1011;

    /// Additive identity.
    pub const ZERO: GfElem = GfElem(0);

    /// Multiplicative identity.
    pub const ONE: GfElem = GfElem(1);

    pub(crate) fn inner(&self) -> GfElemPrimitive {
        self.0
    }

    pub(crate) fn from_inner(v: GfElemPrimitive) -> Self {
        Self(v)
    }

    // Returns a if mask is all ones, and b if mask is all zeroes.
    fn select(mask: GfElemPrimitive, a: Self, b: Self) -> Self {
        Self((a.0 & mask) | (b.0 & !mask))
    }

    /// Exponentiation by squaring over all eight bits of `n`.
    ///
    /// Every bit of the exponent costs exactly one squaring and one
    /// multiplication, regardless of its value.
    pub fn pow(self, n: u8) -> Self {
        let mut base = self;
        let mut result = Self::ONE;
        for bit in 0..8 {
            let mask = ((n >> bit) & 1).wrapping_neg();
            result = Self::select(mask, result * base, result);
            base *= base;
        }
        result
    }

    /// Multiplicative inverse, computed as `a^254` (since `a^255 == 1` for
    /// every non-zero element of the multiplicative group).
    pub fn inverse(self) -> Option<Self> {
        let inv = self.pow(254);
        match self {
            Self::ZERO => None,
            _ => Some(inv),
        }
    }
}

impl From<u8> for GfElem {
    fn from(v: u8) -> Self {
        Self(v)
    }
}

impl From<GfElem> for u8 {
    fn from(v: GfElem) -> Self {
        v.0
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for GfElem {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Self(GfElemPrimitive::arbitrary(g))
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        Box::new(self.0.shrink().map(Self))
    }
}

impl Add for GfElem {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self::Output {
        self += rhs;
        self
    }
}

impl AddAssign for GfElem {
    fn add_assign(&mut self, rhs: Self) {
        // Addition in GF(2^n) is actually XOR.
        #![allow(clippy::suspicious_op_assign_impl)]
        self.0 ^= rhs.0
    }
}

impl Sub for GfElem {
    type Output = Self;
    fn sub(mut self, rhs: Self) -> Self::Output {
        self -= rhs;
        self
    }
}

impl SubAssign for GfElem {
    fn sub_assign(&mut self, rhs: Self) {
        // Subtraction in GF(2^n) is identical to addition.
        #![allow(clippy::suspicious_op_assign_impl)]
        *self += rhs
    }
}

impl Neg for GfElem {
    type Output = Self;
    fn neg(self) -> Self::Output {
        // In GF(2^n) addition is the same as subtraction, so everything is its
        // own additive inverse.
        self
    }
}

impl Mul for GfElem {
    type Output = Self;
    fn mul(mut self, rhs: Self) -> Self::Output {
        self *= rhs;
        self
    }
}

impl MulAssign for GfElem {
    fn mul_assign(&mut self, rhs: Self) {
        // Russian Peasant Multiplication which avoids branching by using masks
        // instead. The loop always runs for all eight bits.
        //   <https://en.wikipedia.org/wiki/Finite_field_arithmetic#D_programming_example>
        let mut a = self.0;
        let mut b = rhs.0;
        let mut p: GfElemPrimitive = 0;
        for _ in 0..8 {
            p ^= a & (b & 1).wrapping_neg();
            let carry = (a >> 7).wrapping_neg();
            a = (a << 1) ^ (Self::TRUNC_POLYNOMIAL & carry);
            b >>= 1;
        }

        // Save the product.
        self.0 = p;
    }
}

impl Div for GfElem {
    type Output = Self;
    fn div(mut self, rhs: Self) -> Self::Output {
        self /= rhs;
        self
    }
}

impl DivAssign for GfElem {
    fn div_assign(&mut self, rhs: Self) {
        // In order to divide, we need to compute the inverse and multiply (like
        // we would with regular arthimetic in R). Callers must never divide by
        // zero -- all share indices are non-zero and pairwise distinct.
        #![allow(clippy::suspicious_op_assign_impl)]
        *self *= rhs.inverse().expect("rhs cannot be inverted")
    }
}

/// A polynomial in `GF(2^8)`.
// The coefficients are in *increasing* degree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GfPolynomial(Vec<GfElem>);

impl GfPolynomial {
    /// Generate a polynomial of degree `n` whose constant term is `constant`
    /// and whose other coefficients are drawn from `r`.
    ///
    /// The random coefficients are uniform over the *whole* field (zero
    /// included), which is what makes any `n` evaluations independent of the
    /// constant term.
    pub fn new_rand<R: CryptoRng + RngCore + ?Sized>(
        constant: GfElem,
        n: usize,
        r: &mut R,
    ) -> Self {
        let mut coeffs = vec![0u8; n];
        r.fill_bytes(&mut coeffs);
        Self(
            std::iter::once(constant)
                .chain(coeffs.into_iter().map(GfElem))
                .collect::<Vec<_>>(),
        )
    }

    /// Evaluate the polynomial at a given `x` value.
    pub fn evaluate(&self, x: GfElem) -> GfElem {
        // Horner's method. Since we order the polynomial terms in terms of
        // increasing degree, we need to do it in reverse.
        self.0
            .iter()
            .rev()
            .fold(GfElem::ZERO, |acc, coeff| *coeff + x * acc)
    }

    /// Compute the Lagrange basis weights `l_j(0)` for a set of x values.
    ///
    /// The weights only depend on the x values, so when many polynomials are
    /// sampled at the same x values (one polynomial per secret byte) they can
    /// be computed once and reused with [`GfPolynomial::weighted_constant`].
    ///
    /// Starting from the Lagrange basis polynomials
    ///
    ///   l_j(x) = \prod_{m=0,m!=j}^{k} \frac{x-x_m}{x_j-x_m}
    ///
    /// and substituting x=0 (remembering that negation is the identity in
    /// `GF(2^n)`) gives
    ///
    ///   l_j(0) = \frac{\prod_{m!=j} x_m}{\prod_{m!=j} (x_j-x_m)}
    ///
    /// which needs only a single inversion per point.
    pub fn lagrange_weights<X: AsRef<[GfElem]>>(xs: X) -> Result<Vec<GfElem>, Error> {
        let xs = xs.as_ref();
        if xs.iter().any(|x| *x == GfElem::ZERO) {
            return Err(Error::NonInvertiblePoint);
        }

        (0..xs.len())
            .map(|j| {
                let (num, den) = (0..xs.len()).filter(|m| *m != j).fold(
                    (GfElem::ONE, GfElem::ONE),
                    |(num, den), m| (num * xs[m], den * (xs[j] - xs[m])),
                );
                den.inverse()
                    .map(|den_inv| num * den_inv)
                    .ok_or(Error::RepeatedPoint)
            })
            .collect()
    }

    /// Sum `y_j * l_j(0)` for pre-computed Lagrange weights.
    pub fn weighted_constant<Y, W>(ys: Y, weights: W) -> GfElem
    where
        Y: IntoIterator<Item = GfElem>,
        W: IntoIterator<Item = GfElem>,
    {
        ys.into_iter()
            .zip(weights)
            .fold(GfElem::ZERO, |acc, (y, w)| acc + y * w)
    }
}

// Helpers for checking the field arithmetic against the textbook definitions.
#[cfg(test)]
impl GfPolynomial {
    fn degree(&self) -> usize {
        self.0.len() - 1
    }

    fn constant(&self) -> GfElem {
        self.0[0]
    }

    /// Interpolate the constant term of the polynomial through `points`.
    fn lagrange_constant<P: AsRef<[(GfElem, GfElem)]>>(points: P) -> Result<GfElem, Error> {
        let (xs, ys): (Vec<_>, Vec<_>) = points.as_ref().iter().copied().unzip();
        let weights = Self::lagrange_weights(xs)?;
        Ok(Self::weighted_constant(ys, weights))
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for GfPolynomial {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        // Keep the degree small enough that there are enough distinct
        // non-zero x values to interpolate it.
        let len = 1 + usize::arbitrary(g) % 64;
        GfPolynomial((0..len).map(|_| GfElem::arbitrary(g)).collect::<Vec<_>>())
    }

    fn shrink(&self) -> Box<dyn Iterator<Item = Self>> {
        Box::new(
            self.0
                .shrink()
                .filter(|p| !p.is_empty())
                .map(Self),
        )
    }
}
