use super::{Lookup, SimpleVariables, VariableIter, Variables};
use crate::{
    error::{Error, Result},
    name::VariableName,
    variable::Variable,
};
use std::sync::Arc;

/// Stack of variable tables, index 0 is the outermost layer
///
/// At most one table is writable. Writes copy that table and swap the copy in wherever it is stacked, nested
/// layered tables included, so tables shared with other stacks are never changed.
#[derive(Debug, Clone)]
pub struct LayeredVariables {
    source: String,
    layers: Vec<Arc<dyn Variables>>,
    writable: Option<Arc<SimpleVariables>>,
}

impl LayeredVariables {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            layers: vec![],
            writable: None,
        }
    }

    pub fn with_layers(
        source: impl Into<String>,
        layers: impl IntoIterator<Item = Arc<dyn Variables>>,
    ) -> Self {
        Self {
            layers: layers.into_iter().collect(),
            ..Self::new(source)
        }
    }

    pub fn add_layer(&mut self, layer: Arc<dyn Variables>) -> &mut Self {
        self.layers.push(layer);
        self
    }

    /// Push `layer` as innermost layer and direct all writes to it
    pub fn add_writable_layer(&mut self, layer: Arc<SimpleVariables>) -> &mut Self {
        self.writable = Some(layer.clone());
        self.layers.push(layer);
        self
    }

    /// Direct all writes to `layer` without stacking it again
    ///
    /// `layer` is expected among the layers already, possibly inside a nested layered table. If it is not, the
    /// first write stacks the copy as innermost layer.
    pub fn set_writable_layer(&mut self, layer: Arc<SimpleVariables>) -> &mut Self {
        self.writable = Some(layer);
        self
    }

    pub fn layers(&self) -> &[Arc<dyn Variables>] {
        &self.layers
    }

    pub fn writable(&self) -> Option<&Arc<SimpleVariables>> {
        self.writable.as_ref()
    }

    /// Replace every occurrence of `old` by `new`, `true` if one was found
    fn swap_table(&mut self, old: &Arc<SimpleVariables>, new: &Arc<SimpleVariables>) -> bool {
        let mut swapped = false;
        for layer in self.layers.iter_mut() {
            if same_table(layer, old) {
                *layer = new.clone() as Arc<dyn Variables>;
                swapped = true;
            } else if let Some(replacement) = layer.with_swapped(old, new) {
                *layer = replacement;
                swapped = true;
            }
        }
        swapped
    }

    /// `false` if any layer from `index` inwards hides `name`
    fn unhidden(&self, name: Option<&VariableName>, index: usize) -> bool {
        let Some(name) = name else {
            return true;
        };
        self.layers[index.min(self.layers.len())..]
            .iter()
            .all(|layer| !layer.hidden(name))
    }
}

impl Variables for LayeredVariables {
    fn source(&self) -> &str {
        &self.source
    }

    fn is_empty(&self) -> bool {
        self.layers.iter().all(|layer| layer.is_empty())
    }

    fn contains(&self, name: &VariableName) -> bool {
        self.layers.iter().rev().any(|layer| layer.contains(name))
    }

    fn contains_children(&self, name: &VariableName) -> bool {
        self.layers
            .iter()
            .rev()
            .any(|layer| layer.contains_children(name))
    }

    fn hidden(&self, name: &VariableName) -> bool {
        self.layers.iter().any(|layer| layer.hidden(name))
    }

    /// innermost hit wins, a masked variable counts as hit
    fn get_with_invisible(&self, name: &VariableName) -> Lookup<'_> {
        self.layers
            .iter()
            .rev()
            .map(|layer| layer.get_with_invisible(name))
            .find(Lookup::is_hit)
            .unwrap_or(Lookup::Missing)
    }

    fn fields(&self, name: &VariableName) -> VariableIter<'_> {
        let mut out = vec![];
        for (index, layer) in self.layers.iter().enumerate() {
            out.extend(
                layer
                    .fields(name)
                    .filter(|v| self.unhidden(v.name(), index + 1)),
            );
        }
        Box::new(out.into_iter())
    }

    fn reverse_fields(&self, name: &VariableName) -> VariableIter<'_> {
        let mut out = vec![];
        for (index, layer) in self.layers.iter().enumerate().rev() {
            out.extend(
                layer
                    .reverse_fields(name)
                    .filter(|v| self.unhidden(v.name(), index + 1)),
            );
        }
        Box::new(out.into_iter())
    }

    fn variables(&self) -> VariableIter<'_> {
        let mut out = vec![];
        for (index, layer) in self.layers.iter().enumerate() {
            out.extend(
                layer
                    .variables()
                    .filter(|v| self.unhidden(v.name(), index + 1)),
            );
        }
        Box::new(out.into_iter())
    }

    fn all_variables(&self) -> VariableIter<'_> {
        Box::new(self.layers.iter().flat_map(|layer| layer.all_variables()))
    }

    fn put(&mut self, variable: Variable) -> Result<()> {
        let Some(writable) = self.writable.clone() else {
            return Err(Error::WritableNotSet(self.source.clone()));
        };
        let mut next = SimpleVariables::clone(&writable);
        next.put(variable)?;
        let next = Arc::new(next);
        if !self.swap_table(&writable, &next) {
            tracing::trace!(source = %self.source, "writable table was not stacked");
            self.layers.push(next.clone());
        }
        self.writable = Some(next);
        Ok(())
    }

    fn clear(&mut self) {
        self.layers.clear();
        self.writable = None;
    }

    fn with_swapped(&self, old: &Arc<SimpleVariables>, new: &Arc<SimpleVariables>) -> Option<Arc<dyn Variables>> {
        let mut copy = self.clone();
        if !copy.swap_table(old, new) {
            return None;
        }
        if copy.writable.as_ref().is_some_and(|writable| Arc::ptr_eq(writable, old)) {
            copy.writable = Some(new.clone());
        }
        Some(Arc::new(copy))
    }
}

fn same_table(layer: &Arc<dyn Variables>, table: &Arc<SimpleVariables>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(layer), Arc::as_ptr(table))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::variable::VariableInfo;
    use pretty_assertions::assert_eq;

    fn layer(source: &str, infos: &[VariableInfo]) -> Arc<dyn Variables> {
        Arc::new(SimpleVariables::from_infos(source, infos).unwrap())
    }

    fn value_of(vars: &dyn Variables, name: &str) -> Option<String> {
        vars.get(&name.into())
            .and_then(Variable::value)
            .map(ToString::to_string)
    }

    fn names<'a>(variables: impl IntoIterator<Item = &'a Variable>) -> Vec<String> {
        variables
            .into_iter()
            .map(|v| v.name().unwrap().to_string())
            .collect()
    }

    #[test]
    fn innermost_layer_wins() {
        let vars = LayeredVariables::with_layers(
            "env",
            [
                layer("root", &[VariableInfo::simple("a", "root"), VariableInfo::simple("b", "root")]),
                layer("child", &[VariableInfo::simple("a", "child")]),
            ],
        );

        assert_eq!(value_of(&vars, "a").as_deref(), Some("child"));
        assert_eq!(value_of(&vars, "b").as_deref(), Some("root"));
        assert_eq!(names(vars.variables()), ["b", "a"]);
        assert_eq!(names(vars.all_variables()), ["a", "b", "a"]);
    }

    #[test]
    fn inner_terminal_masks_outer_descendants() {
        let vars = LayeredVariables::with_layers(
            "env",
            [
                layer("root", &[VariableInfo::simple("db.host", "x"), VariableInfo::simple("db.port", "1")]),
                layer("middle", &[]),
                layer("child", &[VariableInfo::simple("db", "flat")]),
            ],
        );

        assert_eq!(vars.get_with_invisible(&"db.host".into()), Lookup::Invisible);
        assert_eq!(vars.get(&"db.host".into()), None);
        assert!(vars.hidden(&"db.host".into()));
        assert_eq!(names(vars.variables()), ["db"]);
        assert_eq!(names(vars.fields(&"db".into())), Vec::<String>::new());
    }

    #[test]
    fn fields_suppress_names_hidden_by_any_inner_layer() {
        let vars = LayeredVariables::with_layers(
            "env",
            [
                layer("root", &[VariableInfo::simple("m.a", "1"), VariableInfo::simple("m.b", "1")]),
                layer("middle", &[VariableInfo::simple("m.c", "2")]),
                layer("child", &[VariableInfo::simple("m.a", "3")]),
            ],
        );

        assert_eq!(names(vars.fields(&"m".into())), ["m.b", "m.c", "m.a"]);
        assert_eq!(names(vars.reverse_fields(&"m".into())), ["m.a", "m.c", "m.b"]);
        assert_eq!(value_of(&vars, "m.a").as_deref(), Some("3"));
    }

    #[test]
    fn put_writes_a_copy_of_the_writable_layer() {
        let shared = Arc::new(SimpleVariables::from_infos("own", &[VariableInfo::simple("a", "old")]).unwrap());
        let mut vars = LayeredVariables::with_layers("env", [layer("root", &[VariableInfo::simple("r", "1")])]);
        vars.add_writable_layer(shared.clone());

        vars.put(Variable::literal("new").with_name("a".into())).unwrap();

        assert_eq!(value_of(&vars, "a").as_deref(), Some("new"));
        assert_eq!(value_of(shared.as_ref(), "a").as_deref(), Some("old"));
        assert_eq!(value_of(vars.writable().unwrap().as_ref(), "a").as_deref(), Some("new"));
        assert_eq!(vars.layers().len(), 2);
    }

    #[test]
    fn put_swaps_a_marked_table_inside_nested_layers() {
        let own = Arc::new(SimpleVariables::from_infos("own", &[VariableInfo::simple("replicas", "5")]).unwrap());
        let mut inner = LayeredVariables::new("project");
        inner.add_layer(own.clone());
        inner.add_layer(layer("broader", &[VariableInfo::simple("replicas", "4")]));
        inner.set_writable_layer(own.clone());
        let inner: Arc<dyn Variables> = Arc::new(inner);

        let mut vars = LayeredVariables::with_layers("cascade", [layer("env", &[]), inner.clone()]);
        vars.set_writable_layer(own.clone());
        assert_eq!(value_of(&vars, "replicas").as_deref(), Some("4"));

        vars.put(Variable::literal("x").with_name("image".into())).unwrap();

        assert_eq!(vars.layers().len(), 2);
        assert_eq!(value_of(&vars, "image").as_deref(), Some("x"));
        assert_eq!(value_of(&vars, "replicas").as_deref(), Some("4"));
        assert_eq!(value_of(vars.writable().unwrap().as_ref(), "image").as_deref(), Some("x"));
        assert_eq!(value_of(own.as_ref(), "image"), None);
        assert_eq!(value_of(inner.as_ref(), "image"), None);

        vars.put(Variable::literal("y").with_name("image".into())).unwrap();
        assert_eq!(value_of(&vars, "image").as_deref(), Some("y"));
    }

    #[test]
    fn put_stacks_a_marked_table_that_is_not_stacked() {
        let own = Arc::new(SimpleVariables::from_infos("own", &[]).unwrap());
        let mut vars = LayeredVariables::with_layers("env", [layer("root", &[VariableInfo::simple("a", "1")])]);
        vars.set_writable_layer(own);

        vars.put(Variable::literal("2").with_name("a".into())).unwrap();

        assert_eq!(vars.layers().len(), 2);
        assert_eq!(value_of(&vars, "a").as_deref(), Some("2"));
    }

    #[test]
    fn put_without_writable_layer_fails() {
        let mut vars = LayeredVariables::new("inherited");
        let err = vars
            .put(Variable::literal("x").with_name("a".into()))
            .unwrap_err();
        assert!(matches!(err, Error::WritableNotSet(source) if source == "inherited"));
    }
}
