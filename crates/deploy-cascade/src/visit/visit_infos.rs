use super::Visit;
use crate::variable::VariableInfo;

/// Recursively visit all [VariableInfo]s, including the ones nested inside wrappers and containers
pub trait VisitInfos {
    fn visit_infos(&self, visitor: &mut dyn Visit<VariableInfo>);
}

impl VisitInfos for VariableInfo {
    fn visit_infos(&self, visitor: &mut dyn Visit<VariableInfo>) {
        if !visitor.visit(self) {
            return;
        }
        if let Some(inner) = &self.variable {
            inner.visit_infos(visitor);
        }
        if let Some(list) = &self.list {
            list.visit_infos(visitor);
        }
        if let Some(map) = &self.map {
            for info in map.values() {
                info.visit_infos(visitor);
            }
        }
    }
}

impl VisitInfos for [VariableInfo] {
    fn visit_infos(&self, visitor: &mut dyn Visit<VariableInfo>) {
        for info in self {
            info.visit_infos(visitor);
        }
    }
}

impl VisitInfos for Vec<VariableInfo> {
    fn visit_infos(&self, visitor: &mut dyn Visit<VariableInfo>) {
        self.as_slice().visit_infos(visitor)
    }
}
