//! visitor pattern helpers
mod visit_infos;
pub use visit_infos::VisitInfos;

/// Visitor that inspects its subjects
///
/// Returning `false` stops descending into the visited subject.
pub trait Visit<T: ?Sized> {
    fn visit(&mut self, value: &T) -> bool;
}

// blanket impl for FnMut
impl<T: ?Sized, F> Visit<T> for F
where
    F: FnMut(&T) -> bool,
{
    fn visit(&mut self, value: &T) -> bool {
        self(value)
    }
}
