use nalgebra::{DMatrix, DVector};

use crate::coordsys::LocalCoordinateSystem;
use crate::error::{ensure_dimension, CapError, Result};
use crate::maps::{
    AffineMap, AffineSection, ConstraintExtension, ExtensionSettings, GainMap, InverseAffineMap,
    Projection,
};
use crate::oracle::PoincareOracle;
use crate::traits::{ConstraintFunction, Map, Scalar, VectorField};

/// Full local coordinates of `src` to full local coordinates of `dst`:
/// embed, flow to the section of `dst`, and re-express locally.
pub struct AffinePoincareMap<'a, S: Scalar> {
    field: &'a dyn VectorField<S>,
    oracle: &'a mut dyn PoincareOracle<S>,
    order: usize,
    src: AffineMap<S>,
    dst: InverseAffineMap<S>,
    section: AffineSection<S>,
    last_return_time: Option<S>,
}

impl<'a, S: Scalar> AffinePoincareMap<'a, S> {
    pub fn new(
        field: &'a dyn VectorField<S>,
        oracle: &'a mut dyn PoincareOracle<S>,
        order: usize,
        src: LocalCoordinateSystem<S>,
        dst: LocalCoordinateSystem<S>,
    ) -> Result<Self> {
        let dim = field.dimension();
        ensure_dimension("AffinePoincareMap source", dim, src.dimension())?;
        ensure_dimension("AffinePoincareMap target", dim, dst.dimension())?;
        let section = AffineSection::from_frame(&dst)?;
        Ok(Self {
            field,
            oracle,
            order,
            src: AffineMap::new(src),
            dst: InverseAffineMap::new(dst),
            section,
            last_return_time: None,
        })
    }

    pub fn last_return_time(&self) -> Option<S> {
        self.last_return_time
    }
}

impl<S: Scalar> Map<S> for AffinePoincareMap<'_, S> {
    fn dimension(&self) -> usize {
        self.field.dimension()
    }

    fn image_dimension(&self) -> usize {
        self.field.dimension()
    }

    fn eval(&mut self, x: &DVector<S>) -> Result<DVector<S>> {
        let global = self.src.eval(x)?;
        let ret = self
            .oracle
            .cross_section(self.field, self.order, &global, &self.section, false)?;
        self.last_return_time = Some(ret.return_time);
        self.dst.eval(&ret.state)
    }

    fn eval_with_derivative(&mut self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        let (global, d_src) = self.src.eval_with_derivative(x)?;
        let ret = self
            .oracle
            .cross_section(self.field, self.order, &global, &self.section, true)?;
        self.last_return_time = Some(ret.return_time);
        let d_flow = ret.derivative.ok_or_else(|| {
            CapError::OracleNonConvergence("Oracle returned no derivative.".to_string())
        })?;
        ensure_dimension("AffinePoincareMap derivative", self.dimension(), d_flow.nrows())?;
        let (local, d_dst) = self.dst.eval_with_derivative(&ret.state)?;
        Ok((local, d_dst * d_flow * d_src))
    }
}

/// The verifiable return map between two frames, acting on the free
/// (unstable, stable) coordinates.
pub struct LocalPoincareMap<'a, S: Scalar, C: ?Sized> {
    extension: ConstraintExtension<'a, S, C>,
    flow: AffinePoincareMap<'a, S>,
    projection: Projection,
}

impl<'a, S, C> LocalPoincareMap<'a, S, C>
where
    S: Scalar,
    C: ConstraintFunction<S> + ConstraintFunction<f64> + ?Sized,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        field: &'a dyn VectorField<S>,
        constraint: &'a C,
        order: usize,
        src: LocalCoordinateSystem<S>,
        dst: LocalCoordinateSystem<S>,
        oracle: &'a mut dyn PoincareOracle<S>,
        settings: ExtensionSettings,
    ) -> Result<Self> {
        let dim = src.dimension();
        let extension = ConstraintExtension::on_section(constraint, src.clone(), settings)?;
        let flow = AffinePoincareMap::new(field, oracle, order, src, dst)?;
        let projection = Projection::new(dim, extension.free_indices().to_vec())?;
        Ok(Self {
            extension,
            flow,
            projection,
        })
    }

    /// Return time of the most recent evaluation.
    pub fn last_return_time(&self) -> Option<S> {
        self.flow.last_return_time()
    }

    /// Global starting point of the trajectory for free coordinates `v`.
    pub fn initial_state(&mut self, v: &DVector<S>) -> Result<DVector<S>> {
        let local = self.extension.eval(v)?;
        self.extension.frame().to_global(&local)
    }
}

impl<S, C> Map<S> for LocalPoincareMap<'_, S, C>
where
    S: Scalar,
    C: ConstraintFunction<S> + ConstraintFunction<f64> + ?Sized,
{
    fn dimension(&self) -> usize {
        self.extension.dimension()
    }

    fn image_dimension(&self) -> usize {
        Map::<S>::image_dimension(&self.projection)
    }

    fn eval(&mut self, v: &DVector<S>) -> Result<DVector<S>> {
        ensure_dimension("LocalPoincareMap", self.dimension(), v.len())?;
        let local = self.extension.eval(v)?;
        let image = self.flow.eval(&local)?;
        self.projection.eval(&image)
    }

    fn eval_with_derivative(&mut self, v: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        ensure_dimension("LocalPoincareMap", self.dimension(), v.len())?;
        let (local, d_ext) = self.extension.eval_with_derivative(v)?;
        let (image, d_flow) = self.flow.eval_with_derivative(&local)?;
        let (projected, d_proj) = self.projection.eval_with_derivative(&image)?;
        Ok((projected, d_proj * d_flow * d_ext))
    }
}

/// [`LocalPoincareMap`] conjugated by `GainMap(k)` so that it acts on the
/// canonical box while the physical box has size `k`.
pub struct ScaledLocalPoincareMap<'a, S: Scalar, C: ?Sized> {
    inner: LocalPoincareMap<'a, S, C>,
    input: GainMap<S>,
    output: GainMap<S>,
}

impl<'a, S, C> ScaledLocalPoincareMap<'a, S, C>
where
    S: Scalar,
    C: ConstraintFunction<S> + ConstraintFunction<f64> + ?Sized,
{
    pub fn new(inner: LocalPoincareMap<'a, S, C>, gain: S) -> Result<Self> {
        if gain.contains_zero() {
            return Err(CapError::InvalidInput(
                "Gain factor must be nonzero.".to_string(),
            ));
        }
        let dim = inner.dimension();
        let input = GainMap::new(gain, dim);
        let output = input.reciprocal();
        Ok(Self {
            inner,
            input,
            output,
        })
    }

    pub fn gain(&self) -> S {
        self.input.gain()
    }

    pub fn last_return_time(&self) -> Option<S> {
        self.inner.last_return_time()
    }

    pub fn inner_mut(&mut self) -> &mut LocalPoincareMap<'a, S, C> {
        &mut self.inner
    }
}

impl<S, C> Map<S> for ScaledLocalPoincareMap<'_, S, C>
where
    S: Scalar,
    C: ConstraintFunction<S> + ConstraintFunction<f64> + ?Sized,
{
    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn image_dimension(&self) -> usize {
        self.inner.image_dimension()
    }

    fn eval(&mut self, v: &DVector<S>) -> Result<DVector<S>> {
        let scaled = self.input.eval(v)?;
        let image = self.inner.eval(&scaled)?;
        self.output.eval(&image)
    }

    fn eval_with_derivative(&mut self, v: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
        let (scaled, d_in) = self.input.eval_with_derivative(v)?;
        let (image, d_inner) = self.inner.eval_with_derivative(&scaled)?;
        let (out, d_out) = self.output.eval_with_derivative(&image)?;
        Ok((out, d_out * d_inner * d_in))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::interval::Interval;
    use crate::oracle::PoincareReturn;

    /// `x[3] = level`.
    pub(crate) struct Plane {
        pub level: f64,
    }

    impl<S: Scalar> ConstraintFunction<S> for Plane {
        fn dimension(&self) -> usize {
            4
        }

        fn value(&self, x: &DVector<S>) -> Result<S> {
            Ok(x[3] - S::from_f64(self.level))
        }

        fn gradient(&self, _x: &DVector<S>) -> Result<DVector<S>> {
            Ok(DVector::from_vec(vec![
                S::zero(),
                S::zero(),
                S::zero(),
                S::one(),
            ]))
        }
    }

    /// Vector field that is never integrated by the stub oracles.
    pub(crate) struct Constant;

    impl<S: Scalar> VectorField<S> for Constant {
        fn dimension(&self) -> usize {
            4
        }

        fn eval(&self, _x: &DVector<S>) -> Result<DVector<S>> {
            Ok(DVector::from_vec(vec![S::zero(), S::zero(), S::one(), S::zero()]))
        }

        fn eval_with_derivative(&self, x: &DVector<S>) -> Result<(DVector<S>, DMatrix<S>)> {
            Ok((self.eval(x)?, DMatrix::zeros(4, 4)))
        }
    }

    /// `x -> target + matrix (x - source)`, reported as a unit-time return.
    pub(crate) struct LinearOracle<S: Scalar> {
        pub source: DVector<S>,
        pub target: DVector<S>,
        pub matrix: DMatrix<S>,
    }

    impl<S: Scalar> LinearOracle<S> {
        pub fn identity() -> Self {
            Self {
                source: DVector::zeros(4),
                target: DVector::zeros(4),
                matrix: DMatrix::identity(4, 4),
            }
        }
    }

    impl<S: Scalar> PoincareOracle<S> for LinearOracle<S> {
        fn cross_section(
            &mut self,
            _field: &dyn VectorField<S>,
            _order: usize,
            state: &DVector<S>,
            _section: &AffineSection<S>,
            with_derivative: bool,
        ) -> Result<PoincareReturn<S>> {
            let image = &self.target + &self.matrix * (state - &self.source);
            Ok(PoincareReturn {
                state: image,
                derivative: with_derivative.then(|| self.matrix.clone()),
                return_time: S::one(),
            })
        }
    }

    pub(crate) fn rotated_frames() -> (LocalCoordinateSystem<f64>, LocalCoordinateSystem<f64>) {
        let src = LocalCoordinateSystem::identity_at(DVector::zeros(4)).expect("identity");
        let dst = LocalCoordinateSystem::new(
            DVector::zeros(4),
            DMatrix::from_row_slice(
                4,
                4,
                &[
                    0.0, 1.0, 0.0, 0.0, //
                    -1.0, 0.0, 0.0, 0.0, //
                    0.0, 0.0, 1.0, 0.0, //
                    0.0, 0.0, 0.0, 1.0,
                ],
            ),
        )
        .expect("rotation");
        (src, dst)
    }

    #[test]
    fn identity_flow_between_rotated_frames_rotates_by_ninety_degrees() {
        let (src, dst) = rotated_frames();
        let mut oracle = LinearOracle::<f64>::identity();
        let mut map = LocalPoincareMap::new(
            &Constant,
            &Plane { level: 0.0 },
            20,
            src,
            dst,
            &mut oracle,
            ExtensionSettings::default(),
        )
        .expect("map");

        let (y, d) = map
            .eval_with_derivative(&DVector::from_vec(vec![1.0, 0.0]))
            .expect("eval");
        assert_eq!(y, DVector::from_vec(vec![0.0, 1.0]));
        assert_eq!(d, DMatrix::from_row_slice(2, 2, &[0.0, -1.0, 1.0, 0.0]));
        assert_eq!(
            map.eval(&DVector::from_vec(vec![0.0, 1.0])).expect("eval"),
            DVector::from_vec(vec![-1.0, 0.0])
        );
        assert_eq!(map.last_return_time(), Some(1.0));
    }

    #[test]
    fn validated_map_encloses_the_rotation() {
        let (src, dst) = rotated_frames();
        let mut oracle = LinearOracle::<Interval>::identity();
        let mut map = LocalPoincareMap::new(
            &Constant,
            &Plane { level: 0.0 },
            20,
            src.convert::<Interval>().expect("frame"),
            dst.convert::<Interval>().expect("frame"),
            &mut oracle,
            ExtensionSettings::default(),
        )
        .expect("map");
        let y = map
            .eval(&DVector::from_vec(vec![Interval::point(1.0), Interval::point(0.0)]))
            .expect("eval");
        assert!(y[0].contains(0.0));
        assert!(y[1].contains(1.0));
        assert!(y[1].width() < 1e-9);
    }

    #[test]
    fn scaled_map_acts_on_the_canonical_box() {
        let src = LocalCoordinateSystem::identity_at(DVector::from_vec(vec![1.0, 0.0, 0.0, 0.5]))
            .expect("identity");
        let dst = LocalCoordinateSystem::identity_at(DVector::from_vec(vec![0.0, 2.0, 0.0, 0.5]))
            .expect("identity");
        let mut oracle = LinearOracle {
            source: src.origin().clone(),
            target: dst.origin().clone(),
            matrix: DMatrix::from_diagonal(&DVector::from_vec(vec![3.0, 0.25, 1.0, 1.0])),
        };
        let inner = LocalPoincareMap::new(
            &Constant,
            &Plane { level: 0.5 },
            20,
            src,
            dst,
            &mut oracle,
            ExtensionSettings::default(),
        )
        .expect("map");
        let mut scaled = ScaledLocalPoincareMap::new(inner, 0.125).expect("nonzero gain");
        let (y, d) = scaled
            .eval_with_derivative(&DVector::from_vec(vec![1.0, -1.0]))
            .expect("eval");
        assert_eq!(y, DVector::from_vec(vec![3.0, -0.25]));
        assert_eq!(d, DMatrix::from_row_slice(2, 2, &[3.0, 0.0, 0.0, 0.25]));
        assert_eq!(scaled.gain(), 0.125);
        assert_eq!(scaled.last_return_time(), Some(1.0));
        assert!(scaled.eval(&DVector::zeros(3)).is_err());
    }

    #[test]
    fn mismatched_frames_are_rejected() {
        let src = LocalCoordinateSystem::identity_at(DVector::zeros(3)).expect("identity");
        let dst = LocalCoordinateSystem::identity_at(DVector::zeros(4)).expect("identity");
        let mut oracle = LinearOracle::<f64>::identity();
        let err = AffinePoincareMap::new(&Constant, &mut oracle, 20, src, dst)
            .err()
            .expect("dimension mismatch");
        assert!(matches!(err, CapError::DimensionMismatch { .. }));
    }
}
