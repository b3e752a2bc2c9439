use crate::query::{
    ast::delete::Delete,
    dialect::Dialect,
    renderer::{Render, Renderer},
};

impl Render for Delete {
    fn render<D: Dialect + ?Sized>(&self, r: &mut Renderer<'_, D>) {
        r.sql.push_str("DELETE FROM ");
        r.render_table_ref(&self.table);
        r.sql.push_str(" WHERE ");
        r.render_assignments(&self.key_columns, " AND ");
    }
}
