use crate::query::{
    ast::select::{Projection, Select},
    dialect::Dialect,
    renderer::{Render, Renderer},
};

impl Render for Select {
    fn render<D: Dialect + ?Sized>(&self, r: &mut Renderer<'_, D>) {
        r.sql.push_str("SELECT ");
        match self.projection {
            Projection::All => r.sql.push('*'),
            Projection::Count => r.sql.push_str("COUNT(*)"),
        }
        r.sql.push_str(" FROM ");
        r.render_table_ref(&self.table);

        for (i, predicate) in self.filter.iter().enumerate() {
            r.sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            r.push_ident(&predicate.column);
            r.sql.push(' ');
            r.sql.push_str(predicate.op.as_str());
            r.sql.push(' ');
            r.add_placeholder();
        }

        if let Some(order_by) = &self.order_by {
            r.sql.push_str(" ORDER BY ");
            r.push_ident(order_by);
            r.sql.push_str(" ASC");
        }

        if let Some(limit) = self.limit {
            r.sql.push_str(&format!(" LIMIT {limit}"));
        }
    }
}
