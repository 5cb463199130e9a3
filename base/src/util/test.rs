#[macro_export]
macro_rules! assert_eq_f32 {
    ($a: expr, $b: expr) => {{
        let (a, b) = ($a as f32, $b as f32);
        assert!(
            (a - b).abs() <= f32::EPSILON * 16.0 * f32::max(1.0, a.abs()),
            "assertion failed: `(left ~= right)`\n  left: `{}`,\n right: `{}`",
            a,
            b
        );
    }};
}

pub struct MethodMock<Args, Ret> {
    pub args: Vec<Args>,
    pub rets: Vec<Ret>,
}

impl<Args, Ret> MethodMock<Args, Ret> {
    pub fn new() -> Self {
        MethodMock {
            args: vec![],
            rets: vec![],
        }
    }

    pub fn call(&mut self, args: Args) -> Ret {
        assert!(!self.rets.is_empty());
        self.args.push(args);
        self.rets.pop().unwrap()
    }
}

impl<Args, Ret> Default for MethodMock<Args, Ret> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args, Ret> Drop for MethodMock<Args, Ret> {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert!(self.args.is_empty());
            assert!(self.rets.is_empty());
        }
    }
}
